//! JSON wire protocol.
//!
//! Every frame is a JSON text message tagged by `type`:
//!
//! ```text
//! client → server   {"type":"subscribe","projectRoot":"."}
//! server → client   {"type":"file-changed","file":"a.cdml","component":{...}}
//!                   {"type":"file-created","file":"a.cdml"}
//!                   {"type":"file-deleted","file":"a.cdml"}
//! ```
//!
//! `component` is omitted when the file changed but could not be parsed.

use cdml_core::ComponentModel;
use serde::{Deserialize, Serialize};

/// Server → client frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    FileChanged {
        file: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        component: Option<ComponentModel>,
    },
    FileCreated {
        file: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        component: Option<ComponentModel>,
    },
    FileDeleted {
        file: String,
    },
}

impl ServerMessage {
    pub fn file(&self) -> &str {
        match self {
            Self::FileChanged { file, .. }
            | Self::FileCreated { file, .. }
            | Self::FileDeleted { file } => file,
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }
}

/// Client → server frames. `subscribe` is advisory: every socket receives
/// every event for the watched root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    Subscribe {
        #[serde(rename = "projectRoot", default)]
        project_root: String,
    },
}

impl ClientMessage {
    pub fn subscribe(project_root: impl Into<String>) -> Self {
        Self::Subscribe {
            project_root: project_root.into(),
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

/// Typed outcome of classifying one filesystem event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub kind: ChangeKind,
    pub file: String,
    /// Present only for created/modified records whose text parsed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ComponentModel>,
}

impl ChangeRecord {
    pub fn deleted(file: impl Into<String>) -> Self {
        Self {
            kind: ChangeKind::Deleted,
            file: file.into(),
            model: None,
        }
    }
}

impl From<ChangeRecord> for ServerMessage {
    fn from(record: ChangeRecord) -> Self {
        let ChangeRecord { kind, file, model } = record;
        match kind {
            ChangeKind::Created => Self::FileCreated {
                file,
                component: model,
            },
            ChangeKind::Modified => Self::FileChanged {
                file,
                component: model,
            },
            ChangeKind::Deleted => Self::FileDeleted { file },
        }
    }
}

impl From<ServerMessage> for ChangeRecord {
    fn from(message: ServerMessage) -> Self {
        match message {
            ServerMessage::FileCreated { file, component } => Self {
                kind: ChangeKind::Created,
                file,
                model: component,
            },
            ServerMessage::FileChanged { file, component } => Self {
                kind: ChangeKind::Modified,
                file,
                model: component,
            },
            ServerMessage::FileDeleted { file } => Self::deleted(file),
        }
    }
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    ConnectFailed(String),
    ConnectionClosed,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::ConnectFailed(e) => write!(f, "Connect failed: {e}"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for ProtocolError {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_server_message_wire_shape() {
        let msg = ServerMessage::FileChanged {
            file: "a.cdml".into(),
            component: Some(ComponentModel::blank("a", "a.cdml")),
        };
        let value: Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "file-changed");
        assert_eq!(value["file"], "a.cdml");
        assert_eq!(value["component"]["fqn"]["raw"], "a");

        let deleted = ServerMessage::FileDeleted { file: "b.cdml".into() };
        let value: Value = serde_json::from_str(&deleted.encode().unwrap()).unwrap();
        assert_eq!(value, json!({"type": "file-deleted", "file": "b.cdml"}));
    }

    #[test]
    fn test_unparsed_change_omits_component() {
        let msg = ServerMessage::FileCreated {
            file: "a.cdml".into(),
            component: None,
        };
        let text = msg.encode().unwrap();
        assert!(!text.contains("component"));
        assert_eq!(ServerMessage::decode(&text).unwrap(), msg);
    }

    #[test]
    fn test_subscribe_wire_shape() {
        let msg = ClientMessage::decode(r#"{"type":"subscribe","projectRoot":"."}"#).unwrap();
        assert_eq!(msg, ClientMessage::subscribe("."));
        assert_eq!(
            msg.encode().unwrap(),
            r#"{"type":"subscribe","projectRoot":"."}"#
        );
    }

    #[test]
    fn test_malformed_frames_fail_to_decode() {
        assert!(ServerMessage::decode("not json").is_err());
        assert!(ServerMessage::decode(r#"{"type":"file-renamed","file":"a"}"#).is_err());
        assert!(ClientMessage::decode(r#"{"projectRoot":"."}"#).is_err());
    }

    #[test]
    fn test_change_record_conversions() {
        let record = ChangeRecord {
            kind: ChangeKind::Modified,
            file: "a.cdml".into(),
            model: None,
        };
        let msg = ServerMessage::from(record.clone());
        assert_eq!(msg.file(), "a.cdml");
        assert!(matches!(msg, ServerMessage::FileChanged { component: None, .. }));
        assert_eq!(ChangeRecord::from(msg), record);

        assert_eq!(
            ServerMessage::from(ChangeRecord::deleted("x.cdml")),
            ServerMessage::FileDeleted { file: "x.cdml".into() }
        );
    }
}
