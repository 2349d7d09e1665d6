//! Session registry: the process-wide mapping from pair identifier to
//! session, plus the `Session`/`FileRecord` data model (spec §3, §4.2).

use dashmap::DashMap;
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    sync::Arc,
    time::Instant,
};
use tokio::sync::{mpsc, Mutex};

use crate::ids::{PairId, Token};
use crate::protocol::ServerFrame;

pub const MAX_CLIPBOARD_HISTORY: usize = 50;

/// Which side of a pair a connection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Pc,
    App,
}

impl Role {
    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "pc" => Some(Role::Pc),
            "app" => Some(Role::App),
            _ => None,
        }
    }

    pub fn other(self) -> Role {
        match self {
            Role::Pc => Role::App,
            Role::App => Role::Pc,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Pc => "pc",
            Role::App => "app",
        }
    }
}

/// Reason a connection was torn down, used only for logging — the wire
/// protocol has no close-reason frame, the peer learns via `status`/
/// `peer_disconnected`/`file_paused` frames instead.
#[derive(Debug, Clone, Copy)]
pub enum CloseReason {
    Replaced,
    SessionReaped,
    HeartbeatTimeout,
    PeerGone,
}

/// One live connection bound into a role slot. Cheap to clone; the
/// `closed`/`alive` flags and the outbound channel are shared with the
/// per-connection driver task that owns the actual socket.
#[derive(Clone)]
pub struct ConnectionSlot {
    pub conn_id: u64,
    pub device_name: String,
    frame_tx: mpsc::UnboundedSender<ServerFrame>,
    alive: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

impl ConnectionSlot {
    pub fn new(device_name: String, frame_tx: mpsc::UnboundedSender<ServerFrame>) -> Self {
        Self {
            conn_id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
            device_name,
            frame_tx,
            alive: Arc::new(AtomicBool::new(true)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// "Safe send": if the connection's writer has gone away, the frame is
    /// dropped silently (spec §4.4) rather than treated as an error.
    pub fn send(&self, frame: ServerFrame) -> bool {
        if self.closed.load(Ordering::Relaxed) {
            return false;
        }
        self.frame_tx.send(frame).is_ok()
    }

    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Relaxed)
    }

    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Relaxed);
    }

    /// Clears the flag and reports whether it was set — used by the
    /// heartbeat sweep to decide whether to ping or terminate.
    pub fn take_alive(&self) -> bool {
        self.alive.swap(false, Ordering::Relaxed)
    }

    /// Marks this slot's underlying socket as gone. Subsequent `send`
    /// calls become no-ops; existing in-flight forwards targeting it
    /// silently drop (spec §5 Cancellation).
    pub fn close(&self, _reason: CloseReason) {
        self.closed.store(true, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone)]
pub struct ClipboardEntry {
    pub from: String,
    pub content: String,
    pub timestamp: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Sending,
    Paused,
    Completed,
}

pub struct FileRecord {
    pub file_id: String,
    pub name: String,
    pub total_chunks: u64,
    pub total_size: Option<u64>,
    pub sender_role: Role,
    pub received_map: HashSet<u64>,
    pub status: FileStatus,
    pub created_at: Instant,
    pub last_activity: Instant,
    /// Consecutive failed forward attempts for the chunk currently being
    /// retried; reset whenever a chunk forwards successfully.
    pub retry_count: u32,
}

impl FileRecord {
    pub fn new(file_id: String, name: String, total_chunks: u64, total_size: Option<u64>, sender_role: Role) -> Self {
        let now = Instant::now();
        Self {
            file_id,
            name,
            total_chunks,
            total_size,
            sender_role,
            received_map: HashSet::new(),
            status: FileStatus::Sending,
            created_at: now,
            last_activity: now,
            retry_count: 0,
        }
    }

    pub fn received_chunks(&self) -> u64 {
        self.received_map.len() as u64
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status, FileStatus::Sending | FileStatus::Paused)
    }

    /// `{0..totalChunks-1} \ receivedMap`, in ascending order.
    pub fn missing_chunks(&self) -> Vec<u64> {
        (0..self.total_chunks)
            .filter(|i| !self.received_map.contains(i))
            .collect()
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

pub struct Session {
    pub pair_id: PairId,
    pub token: Token,
    pub pc: Option<ConnectionSlot>,
    pub app: Option<ConnectionSlot>,
    pub clipboard_history: VecDeque<ClipboardEntry>,
    pub files: HashMap<String, FileRecord>,
    pub created_at: Instant,
    pub last_activity: Instant,
    /// Once true, the mint-TTL reaper leaves this session alone even if
    /// both slots later go empty again (spec §4.1).
    pub ever_fully_bound: bool,
}

impl Session {
    pub fn new(pair_id: PairId, token: Token) -> Self {
        let now = Instant::now();
        Self {
            pair_id,
            token,
            pc: None,
            app: None,
            clipboard_history: VecDeque::new(),
            files: HashMap::new(),
            created_at: now,
            last_activity: now,
            ever_fully_bound: false,
        }
    }

    pub fn slot(&self, role: Role) -> &Option<ConnectionSlot> {
        match role {
            Role::Pc => &self.pc,
            Role::App => &self.app,
        }
    }

    pub fn slot_mut(&mut self, role: Role) -> &mut Option<ConnectionSlot> {
        match role {
            Role::Pc => &mut self.pc,
            Role::App => &mut self.app,
        }
    }

    pub fn both_bound(&self) -> bool {
        self.pc.is_some() && self.app.is_some()
    }

    pub fn both_empty(&self) -> bool {
        self.pc.is_none() && self.app.is_none()
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn push_clipboard(&mut self, from: String, content: String) {
        self.clipboard_history.push_back(ClipboardEntry {
            from,
            content,
            timestamp: Instant::now(),
        });
        while self.clipboard_history.len() > MAX_CLIPBOARD_HISTORY {
            self.clipboard_history.pop_front();
        }
    }

    pub fn active_file_count(&self) -> usize {
        self.files.values().filter(|f| f.is_active()).count()
    }

    /// Sends a frame to the given role's slot if bound and open; returns
    /// whether the frame was actually delivered.
    pub fn send_to(&self, role: Role, frame: ServerFrame) -> bool {
        match self.slot(role) {
            Some(slot) if slot.is_open() => slot.send(frame),
            _ => false,
        }
    }

    pub fn broadcast(&self, frame: ServerFrame) {
        self.send_to(Role::Pc, frame.clone());
        self.send_to(Role::App, frame);
    }
}

pub type SessionHandle = Arc<Mutex<Session>>;

/// Process-wide `PairId -> Session` map. Each session is independently
/// lockable so unrelated pairs never contend with each other.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<PairId, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
        }
    }

    pub fn contains(&self, id: &PairId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn insert(&self, session: Session) -> SessionHandle {
        let id = session.pair_id.clone();
        let handle = Arc::new(Mutex::new(session));
        self.sessions.insert(id, handle.clone());
        handle
    }

    pub fn get(&self, id: &PairId) -> Option<SessionHandle> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, id: &PairId) -> Option<SessionHandle> {
        self.sessions.remove(id).map(|(_, handle)| handle)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// All `(PairId, SessionHandle)` pairs, snapshotted for the reaper to
    /// walk without holding the map's internal shards locked.
    pub fn snapshot(&self) -> Vec<(PairId, SessionHandle)> {
        self.sessions
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clipboard_history_caps_at_fifty() {
        let mut session = Session::new(PairId::generate(), Token::generate());
        for i in 0..60 {
            session.push_clipboard("pc".into(), format!("entry-{i}"));
        }
        assert_eq!(session.clipboard_history.len(), MAX_CLIPBOARD_HISTORY);
        assert_eq!(session.clipboard_history.front().unwrap().content, "entry-10");
        assert_eq!(session.clipboard_history.back().unwrap().content, "entry-59");
    }

    #[test]
    fn missing_chunks_excludes_received() {
        let mut file = FileRecord::new("f1".into(), "x.bin".into(), 5, None, Role::Pc);
        file.received_map.insert(0);
        file.received_map.insert(2);
        assert_eq!(file.missing_chunks(), vec![1, 3, 4]);
        assert_eq!(file.received_chunks(), 2);
    }

    #[tokio::test]
    async fn registry_roundtrips_sessions() {
        let registry = SessionRegistry::new();
        let id = PairId::generate();
        let session = Session::new(id.clone(), Token::generate());
        registry.insert(session);

        assert!(registry.contains(&id));
        let handle = registry.get(&id).unwrap();
        assert_eq!(handle.lock().await.pair_id, id);

        registry.remove(&id);
        assert!(!registry.contains(&id));
    }
}
