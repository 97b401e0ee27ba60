//! # walink-whatsapp - templated WhatsApp messaging over a linked device
//!
//! Thin client around an external WhatsApp Web transport.
//!
//! ## Capabilities
//!
//! - **Templates** – named text generators (placeholder bodies or render
//!   functions) with a built-in catalogue of transactional messages.
//! - **Lifecycle** – connect, pair by QR or phone-number code, persist
//!   credentials, and reconnect transient closes with back-off.
//! - **Messaging** – send raw content or rendered templates to phone numbers
//!   and JIDs once the link is open.
//! - **Caches** – bounded TTL caches for group metadata and message content.
//! - **Loopback** – an in-process transport for dry runs and tests.

pub mod types;
pub mod error;
pub mod config;
pub mod jid;
pub mod templates;
pub mod pairing;
pub mod cache;
pub mod credentials;
pub mod transport;
pub mod lifecycle;
pub mod loopback;
pub mod service;

// Re-exports
pub use config::{CacheConfig, ClientConfig, ReconnectPolicy, DEFAULT_AUTH_PATH};
pub use credentials::{CredentialStore, FileCredentialStore};
pub use error::{WaError, WaErrorCode, WaResult};
pub use jid::normalize_jid;
pub use lifecycle::ConnectionManager;
pub use loopback::LoopbackTransport;
pub use pairing::{render_qr_terminal, PairingMethod};
pub use service::{WhatsAppClient, WhatsAppClientState};
pub use templates::{MessageTemplate, TemplateParams, TemplateRegistry};
pub use transport::{ConnectOptions, Transport, TransportHandle, TransportSession};
pub use types::*;
