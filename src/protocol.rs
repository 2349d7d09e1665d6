//! Wire format: length-delimited JSON frames exchanged over the websocket
//! upgrade at `/connect`. See spec §6 for the full message table.

use serde::{Deserialize, Serialize};

/// Frames sent from either side into the server.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    #[serde(rename = "clipboard")]
    Clipboard { content: String },

    #[serde(rename = "file_meta")]
    FileMeta {
        #[serde(rename = "fileId")]
        file_id: String,
        #[serde(rename = "fileName")]
        file_name: String,
        #[serde(rename = "totalChunks")]
        total_chunks: serde_json::Value,
        #[serde(rename = "totalSize")]
        total_size: Option<u64>,
    },

    #[serde(rename = "file_chunk")]
    FileChunk {
        #[serde(rename = "fileId")]
        file_id: String,
        #[serde(rename = "chunkIndex")]
        chunk_index: u64,
        #[serde(rename = "totalChunks")]
        total_chunks: u64,
        data: String,
    },

    #[serde(rename = "file_chunk_ack")]
    FileChunkAck {
        #[serde(rename = "fileId")]
        file_id: String,
        #[serde(rename = "chunkIndex")]
        chunk_index: u64,
    },

    #[serde(rename = "file_complete")]
    FileComplete {
        #[serde(rename = "fileId")]
        file_id: String,
    },

    #[serde(rename = "pause_file")]
    PauseFile {
        #[serde(rename = "fileId")]
        file_id: String,
    },

    #[serde(rename = "resume_file")]
    ResumeFile {
        #[serde(rename = "fileId")]
        file_id: String,
    },

    #[serde(rename = "request_chunks")]
    RequestChunks {
        #[serde(rename = "fileId")]
        file_id: String,
        chunks: Vec<u64>,
    },

    #[serde(rename = "file_missing_chunks")]
    FileMissingChunks {
        #[serde(rename = "fileId")]
        file_id: String,
        chunks: Vec<MissingChunkEntry>,
    },
}

/// One element of a `file_missing_chunks` list sent sender->server: either
/// a bare chunk index (ignored, per Open Question (a)) or an object
/// carrying the chunk's data to re-forward immediately.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MissingChunkEntry {
    WithData {
        #[serde(rename = "chunkIndex")]
        chunk_index: u64,
        data: String,
    },
    BareIndex(u64),
}

/// Frames the server sends to a connected peer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "status")]
    Status { message: String },

    #[serde(rename = "error")]
    Error { message: String },

    #[serde(rename = "expired")]
    Expired {},

    #[serde(rename = "peer_disconnected")]
    PeerDisconnected { side: String, message: String },

    #[serde(rename = "clipboard")]
    Clipboard { from: String, content: String },

    #[serde(rename = "file_meta")]
    FileMeta {
        #[serde(rename = "fileId")]
        file_id: String,
        #[serde(rename = "fileName")]
        file_name: String,
        #[serde(rename = "totalChunks")]
        total_chunks: u64,
        #[serde(rename = "totalSize", skip_serializing_if = "Option::is_none")]
        total_size: Option<u64>,
    },

    #[serde(rename = "file_chunk")]
    FileChunk {
        #[serde(rename = "fileId")]
        file_id: String,
        #[serde(rename = "chunkIndex")]
        chunk_index: u64,
        #[serde(rename = "totalChunks")]
        total_chunks: u64,
        data: String,
    },

    #[serde(rename = "file_chunk_ack")]
    FileChunkAck {
        #[serde(rename = "fileId")]
        file_id: String,
        #[serde(rename = "chunkIndex")]
        chunk_index: u64,
    },

    #[serde(rename = "file_progress")]
    FileProgress {
        #[serde(rename = "fileId")]
        file_id: String,
        #[serde(rename = "receivedChunks")]
        received_chunks: u64,
        #[serde(rename = "totalChunks")]
        total_chunks: u64,
    },

    #[serde(rename = "file_complete")]
    FileComplete {
        #[serde(rename = "fileId")]
        file_id: String,
    },

    #[serde(rename = "file_paused")]
    FilePaused {
        #[serde(rename = "fileId")]
        file_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    #[serde(rename = "file_resumed")]
    FileResumed {
        #[serde(rename = "fileId")]
        file_id: String,
    },

    #[serde(rename = "file_missing_chunks")]
    FileMissingChunks {
        #[serde(rename = "fileId")]
        file_id: String,
        chunks: Vec<u64>,
    },
}

impl ServerFrame {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("ServerFrame always serializes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_clipboard_frame() {
        let json = r#"{"type":"clipboard","content":"hello"}"#;
        let frame: ClientFrame = serde_json::from_str(json).unwrap();
        matches!(frame, ClientFrame::Clipboard { content } if content == "hello");
    }

    #[test]
    fn parses_file_missing_chunks_with_mixed_entries() {
        let json = r#"{"type":"file_missing_chunks","fileId":"F","chunks":[2,{"chunkIndex":5,"data":"aGk="}]}"#;
        let frame: ClientFrame = serde_json::from_str(json).unwrap();
        match frame {
            ClientFrame::FileMissingChunks { chunks, .. } => {
                assert_eq!(chunks.len(), 2);
                assert!(matches!(chunks[0], MissingChunkEntry::BareIndex(2)));
                assert!(matches!(chunks[1], MissingChunkEntry::WithData { chunk_index: 5, .. }));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn server_frame_omits_absent_total_size() {
        let frame = ServerFrame::FileMeta {
            file_id: "F".into(),
            file_name: "x.bin".into(),
            total_chunks: 3,
            total_size: None,
        };
        let json = frame.to_json();
        assert!(!json.contains("totalSize"));
    }

    #[test]
    fn unknown_type_fails_to_parse() {
        let json = r#"{"type":"not_a_real_type"}"#;
        let result: Result<ClientFrame, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }
}
