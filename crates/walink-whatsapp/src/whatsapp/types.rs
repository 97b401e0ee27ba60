//! Shared types for the WhatsApp client wrapper.
//!
//! Models cover the connection lifecycle, close classification, the events
//! exchanged with the transport, message content, and group metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ═══════════════════════════════════════════════════════════════════════
//  Connection lifecycle
// ═══════════════════════════════════════════════════════════════════════

/// Why the transport closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CloseReason {
    /// The device was unlinked; terminal.
    LoggedOut,
    /// Anything else; retried.
    Transient,
}

/// Connection state of a client. Owned by the lifecycle manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closed(CloseReason),
    /// Terminal failure that was not a transport close (credential I/O,
    /// transport open failure).
    Failed(String),
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Open => write!(f, "open"),
            ConnectionState::Closed(CloseReason::LoggedOut) => write!(f, "closed (logged out)"),
            ConnectionState::Closed(CloseReason::Transient) => write!(f, "closed (transient)"),
            ConnectionState::Failed(msg) => write!(f, "failed: {}", msg),
        }
    }
}

/// Status codes the transport attaches to a close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DisconnectStatus {
    LoggedOut,
    Forbidden,
    ConnectionLost,
    MultideviceMismatch,
    ConnectionClosed,
    ConnectionReplaced,
    BadSession,
    UnavailableService,
    RestartRequired,
    Other(u16),
}

impl DisconnectStatus {
    pub fn from_code(code: u16) -> Self {
        match code {
            401 => DisconnectStatus::LoggedOut,
            403 => DisconnectStatus::Forbidden,
            408 => DisconnectStatus::ConnectionLost,
            411 => DisconnectStatus::MultideviceMismatch,
            428 => DisconnectStatus::ConnectionClosed,
            440 => DisconnectStatus::ConnectionReplaced,
            500 => DisconnectStatus::BadSession,
            503 => DisconnectStatus::UnavailableService,
            515 => DisconnectStatus::RestartRequired,
            other => DisconnectStatus::Other(other),
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            DisconnectStatus::LoggedOut => 401,
            DisconnectStatus::Forbidden => 403,
            DisconnectStatus::ConnectionLost => 408,
            DisconnectStatus::MultideviceMismatch => 411,
            DisconnectStatus::ConnectionClosed => 428,
            DisconnectStatus::ConnectionReplaced => 440,
            DisconnectStatus::BadSession => 500,
            DisconnectStatus::UnavailableService => 503,
            DisconnectStatus::RestartRequired => 515,
            DisconnectStatus::Other(c) => *c,
        }
    }
}

/// Error attached to a `close` connection update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseError {
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub message: String,
}

impl CloseError {
    pub fn new(status: DisconnectStatus, message: impl Into<String>) -> Self {
        Self {
            status_code: Some(status.code()),
            message: message.into(),
        }
    }

    pub fn status(&self) -> Option<DisconnectStatus> {
        self.status_code.map(DisconnectStatus::from_code)
    }

    /// Only an explicit logged-out status is terminal; a missing status
    /// code is treated as transient.
    pub fn classify(close_error: Option<&CloseError>) -> CloseReason {
        match close_error.and_then(CloseError::status) {
            Some(DisconnectStatus::LoggedOut) => CloseReason::LoggedOut,
            _ => CloseReason::Transient,
        }
    }
}

/// Phase reported by a connection update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionPhase {
    Connecting,
    Open,
    Close,
}

/// A `connection.update` payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionUpdate {
    #[serde(default)]
    pub phase: Option<ConnectionPhase>,
    #[serde(default)]
    pub close_error: Option<CloseError>,
    #[serde(default)]
    pub qr: Option<String>,
    #[serde(default)]
    pub pairing_code: Option<String>,
}

impl ConnectionUpdate {
    pub fn open() -> Self {
        Self {
            phase: Some(ConnectionPhase::Open),
            ..Default::default()
        }
    }

    pub fn closed(status: DisconnectStatus, message: impl Into<String>) -> Self {
        Self {
            phase: Some(ConnectionPhase::Close),
            close_error: Some(CloseError::new(status, message)),
            ..Default::default()
        }
    }

    pub fn qr(payload: impl Into<String>) -> Self {
        Self {
            qr: Some(payload.into()),
            ..Default::default()
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Credentials
// ═══════════════════════════════════════════════════════════════════════

/// Opaque credential blob owned by the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(pub serde_json::Value);

/// Credentials restored from the store; `None` for a fresh login.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthState {
    pub creds: Option<Credentials>,
}

impl AuthState {
    pub fn is_fresh(&self) -> bool {
        self.creds.is_none()
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Messages
// ═══════════════════════════════════════════════════════════════════════

/// Message content forwarded verbatim to the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text { text: String },
    /// Any other payload shape the transport understands.
    Custom(serde_json::Value),
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        MessageContent::Text { text: text.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text { text } => Some(text),
            MessageContent::Custom(v) => v["text"].as_str(),
        }
    }
}

/// Acknowledgement returned by the transport for a sent message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReceipt {
    pub message_id: String,
    pub jid: String,
    pub sent_at: DateTime<Utc>,
}

/// How a batch of messages arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UpsertKind {
    /// New messages delivered live.
    Notify,
    /// History or messages sent from another device.
    Append,
}

/// A message received from (or echoed by) the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub id: String,
    pub remote_jid: String,
    #[serde(default)]
    pub from_me: bool,
    #[serde(default)]
    pub participant: Option<String>,
    #[serde(default)]
    pub push_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub content: Option<MessageContent>,
}

// ═══════════════════════════════════════════════════════════════════════
//  Groups
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupParticipant {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin: Option<String>,
}

/// Group metadata as reported by the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMetadata {
    pub id: String,
    pub subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default)]
    pub creation: u64,
    #[serde(default)]
    pub participants: Vec<GroupParticipant>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Partial group change; absent fields are unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupUpdate {
    pub id: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub participants: Option<Vec<GroupParticipant>>,
}

impl GroupUpdate {
    /// Merge this change into cached metadata.
    pub fn apply_to(&self, meta: &mut GroupMetadata) {
        if let Some(ref s) = self.subject {
            meta.subject = s.clone();
        }
        if let Some(ref d) = self.description {
            meta.description = Some(d.clone());
        }
        if let Some(ref o) = self.owner {
            meta.owner = Some(o.clone());
        }
        if let Some(ref p) = self.participants {
            meta.participants = p.clone();
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Events
// ═══════════════════════════════════════════════════════════════════════

/// Events produced by a transport session.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    CredsUpdate(Credentials),
    ConnectionUpdate(ConnectionUpdate),
    MessagesUpsert {
        messages: Vec<InboundMessage>,
        kind: UpsertKind,
    },
    GroupsUpsert(Vec<GroupMetadata>),
    GroupsUpdate(Vec<GroupUpdate>),
}

/// Events re-emitted to the embedding application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    ConnectionStateChanged(ConnectionState),
    Qr(String),
    #[serde(rename = "pairing-code")]
    PairingCode(String),
    Message(InboundMessage),
    #[serde(rename = "groups.upsert")]
    GroupsUpsert(Vec<GroupMetadata>),
    #[serde(rename = "groups.update")]
    GroupsUpdate(Vec<GroupUpdate>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_logged_out() {
        let err = CloseError::new(DisconnectStatus::LoggedOut, "unlinked");
        assert_eq!(CloseError::classify(Some(&err)), CloseReason::LoggedOut);
    }

    #[test]
    fn test_classify_transient_codes() {
        for code in [403u16, 408, 411, 428, 440, 500, 503, 515, 999] {
            let err = CloseError {
                status_code: Some(code),
                message: String::new(),
            };
            assert_eq!(CloseError::classify(Some(&err)), CloseReason::Transient);
        }
    }

    #[test]
    fn test_classify_missing_error_is_transient() {
        assert_eq!(CloseError::classify(None), CloseReason::Transient);
        let no_code = CloseError {
            status_code: None,
            message: "stream errored".into(),
        };
        assert_eq!(CloseError::classify(Some(&no_code)), CloseReason::Transient);
    }

    #[test]
    fn test_disconnect_status_codes() {
        assert_eq!(DisconnectStatus::from_code(515), DisconnectStatus::RestartRequired);
        assert_eq!(DisconnectStatus::RestartRequired.code(), 515);
        assert_eq!(DisconnectStatus::from_code(499), DisconnectStatus::Other(499));
    }

    #[test]
    fn test_text_content_serializes_like_transport_payload() {
        let json = serde_json::to_value(MessageContent::text("hi")).unwrap();
        assert_eq!(json, serde_json::json!({ "text": "hi" }));

        let parsed: MessageContent =
            serde_json::from_value(serde_json::json!({ "text": "yo" })).unwrap();
        assert_eq!(parsed.as_text(), Some("yo"));
    }

    #[test]
    fn test_group_update_merges_present_fields() {
        let mut meta = GroupMetadata {
            id: "1@g.us".into(),
            subject: "Old".into(),
            owner: None,
            creation: 0,
            participants: vec![],
            description: Some("desc".into()),
        };
        GroupUpdate {
            id: "1@g.us".into(),
            subject: Some("New".into()),
            ..Default::default()
        }
        .apply_to(&mut meta);

        assert_eq!(meta.subject, "New");
        assert_eq!(meta.description.as_deref(), Some("desc"));
    }

    #[test]
    fn test_client_event_tag_names() {
        let json = serde_json::to_string(&ClientEvent::GroupsUpsert(vec![])).unwrap();
        assert!(json.contains("groups.upsert"));
        let json = serde_json::to_string(&ClientEvent::Qr("abc".into())).unwrap();
        assert!(json.contains("\"qr\""));
        let json = serde_json::to_string(&ClientEvent::PairingCode("12345678".into())).unwrap();
        assert_eq!(json, r#"{"type":"pairing-code","data":"12345678"}"#);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Open.to_string(), "open");
        assert_eq!(
            ConnectionState::Closed(CloseReason::LoggedOut).to_string(),
            "closed (logged out)"
        );
    }
}
