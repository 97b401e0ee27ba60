//! Seams to the external protocol library.
//!
//! The wire protocol, encryption, and device handshake live behind these
//! traits. A transport opens a session that yields a handle for outbound
//! calls and a stream of [`TransportEvent`]s.

use crate::whatsapp::error::WaResult;
use crate::whatsapp::types::{AuthState, GroupMetadata, MessageContent, SendReceipt, TransportEvent};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Options passed on every connect.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectOptions {
    /// Browser description (name, platform, version).
    pub browser: (String, String, String),
    /// Whether the transport should print QR codes itself. Always false;
    /// QR payloads are emitted to observers instead.
    pub print_qr_in_terminal: bool,
}

/// An open transport session.
pub struct TransportSession {
    pub handle: Arc<dyn TransportHandle>,
    /// Ends when the underlying socket is gone.
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Factory for transport sessions.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a new socket with the given credentials.
    async fn connect(
        &self,
        auth: AuthState,
        version: [u32; 3],
        options: &ConnectOptions,
    ) -> WaResult<TransportSession>;
}

/// Outbound operations on an open session.
#[async_trait]
pub trait TransportHandle: Send + Sync {
    /// Send a message; resolves once the transport acknowledges the write.
    async fn send_message(&self, jid: &str, content: &MessageContent) -> WaResult<SendReceipt>;

    /// Close the socket without invalidating credentials.
    async fn end(&self);

    /// Unlink the device on the server side.
    async fn logout(&self) -> WaResult<()>;

    /// Ask for a pairing code for phone-number linking.
    async fn request_pairing_code(&self, phone_number: &str) -> WaResult<String>;

    async fn group_metadata(&self, jid: &str) -> WaResult<GroupMetadata>;
}
