//! Crate-level error types for the WhatsApp client wrapper.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Alias for `Result<T, WaError>`.
pub type WaResult<T> = Result<T, WaError>;

/// Uniform error type used across the crate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WaError {
    pub code: WaErrorCode,
    pub message: String,
    /// Optional detail from the transport or the file system.
    pub details: Option<String>,
}

impl fmt::Display for WaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.code, self.message)?;
        if let Some(ref d) = self.details {
            write!(f, " ({})", d)?;
        }
        Ok(())
    }
}

impl std::error::Error for WaError {}

/// Categorised error codes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WaErrorCode {
    // ── Messaging ────────────────────────────────────────
    NotConnected,
    TemplateNotFound,
    DuplicateTemplate,
    InvalidParameter,
    // ── Lifecycle ────────────────────────────────────────
    LoggedOut,
    TransientDisconnect,
    ReconnectExhausted,
    DisconnectedDuringInit,
    PairingCodeRequired,
    // ── Collaborators ────────────────────────────────────
    CredentialIo,
    TransportError,
    // ── Internal ─────────────────────────────────────────
    SerializationError,
    InternalError,
}

impl WaError {
    pub fn new(code: WaErrorCode, msg: impl Into<String>) -> Self {
        Self {
            code,
            message: msg.into(),
            details: None,
        }
    }

    /// Attach a detail string (builder style).
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn not_connected() -> Self {
        Self::new(
            WaErrorCode::NotConnected,
            "WhatsApp client is not connected",
        )
    }

    pub fn template_not_found(name: &str) -> Self {
        Self::new(
            WaErrorCode::TemplateNotFound,
            format!("Template \"{}\" not found", name),
        )
    }

    pub fn duplicate_template(name: &str) -> Self {
        Self::new(
            WaErrorCode::DuplicateTemplate,
            format!("Template \"{}\" is already registered", name),
        )
    }

    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        Self::new(WaErrorCode::InvalidParameter, msg)
    }

    pub fn logged_out(auth_path: &str) -> Self {
        Self::new(
            WaErrorCode::LoggedOut,
            "Logged out; re-authentication required",
        )
        .with_details(format!("credentials at '{}' were purged", auth_path))
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::new(WaErrorCode::TransientDisconnect, msg)
    }

    pub fn reconnect_exhausted(attempts: u32) -> Self {
        Self::new(
            WaErrorCode::ReconnectExhausted,
            format!("Gave up reconnecting after {} attempts", attempts),
        )
    }

    pub fn disconnected_during_init() -> Self {
        Self::new(
            WaErrorCode::DisconnectedDuringInit,
            "Client was disconnected while initialization was pending",
        )
    }

    pub fn pairing_code_required() -> Self {
        Self::new(
            WaErrorCode::PairingCodeRequired,
            "Pairing-code login requested without a phone number",
        )
    }

    pub fn credential_io(msg: impl Into<String>) -> Self {
        Self::new(WaErrorCode::CredentialIo, msg)
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::new(WaErrorCode::TransportError, msg)
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::new(WaErrorCode::SerializationError, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(WaErrorCode::InternalError, msg)
    }
}

impl From<serde_json::Error> for WaError {
    fn from(e: serde_json::Error) -> Self {
        WaError::serialization(e.to_string())
    }
}
