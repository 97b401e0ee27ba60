//! In-process transport.
//!
//! Simulates a linked device without any network: a fresh login gets a QR
//! payload and a credential update before the link opens, restored
//! credentials open straight away. Sends are acknowledged and recorded.

use crate::whatsapp::error::{WaError, WaResult};
use crate::whatsapp::jid;
use crate::whatsapp::pairing::generate_pairing_code;
use crate::whatsapp::transport::{ConnectOptions, Transport, TransportHandle, TransportSession};
use crate::whatsapp::types::*;
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info};
use rand::RngCore;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// A message the loopback transport acknowledged.
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub jid: String,
    pub content: MessageContent,
    pub message_id: String,
}

/// Transport that never leaves the process.
#[derive(Default)]
pub struct LoopbackTransport {
    current: Mutex<Option<Arc<LoopbackHandle>>>,
    sent: Arc<Mutex<Vec<SentMessage>>>,
    connects: AtomicU32,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many sessions have been opened.
    pub fn connect_count(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    pub async fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().await.clone()
    }

    /// Push an event into the live session, as if the server sent it.
    pub async fn deliver(&self, event: TransportEvent) -> WaResult<()> {
        let handle = self
            .current
            .lock()
            .await
            .clone()
            .ok_or_else(|| WaError::transport("No loopback session is open"))?;
        let tx = handle.tx.lock().await;
        let tx = tx
            .as_ref()
            .ok_or_else(|| WaError::transport("Loopback session has ended"))?;
        tx.send(event)
            .map_err(|_| WaError::transport("Loopback session is closed"))
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn connect(
        &self,
        auth: AuthState,
        version: [u32; 3],
        options: &ConnectOptions,
    ) -> WaResult<TransportSession> {
        let n = self.connects.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(
            "Loopback connect #{} as {:?} (version {:?})",
            n, options.browser, version
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let send = |event| {
            tx.send(event)
                .map_err(|_| WaError::internal("Loopback event channel closed"))
        };

        if auth.is_fresh() {
            send(TransportEvent::ConnectionUpdate(ConnectionUpdate::qr(qr_payload())))?;
            send(TransportEvent::CredsUpdate(fresh_credentials()))?;
        }
        send(TransportEvent::ConnectionUpdate(ConnectionUpdate::open()))?;

        let handle = Arc::new(LoopbackHandle {
            tx: Mutex::new(Some(tx)),
            sent: self.sent.clone(),
        });
        *self.current.lock().await = Some(handle.clone());

        Ok(TransportSession { handle, events: rx })
    }
}

/// One session's half of the link. Ending it leaves later sessions alone.
struct LoopbackHandle {
    tx: Mutex<Option<EventSender>>,
    sent: Arc<Mutex<Vec<SentMessage>>>,
}

#[async_trait]
impl TransportHandle for LoopbackHandle {
    async fn send_message(&self, jid: &str, content: &MessageContent) -> WaResult<SendReceipt> {
        if self.tx.lock().await.is_none() {
            return Err(WaError::transport("Loopback session has ended"));
        }

        let message_id = message_id();
        self.sent.lock().await.push(SentMessage {
            jid: jid.to_string(),
            content: content.clone(),
            message_id: message_id.clone(),
        });

        Ok(SendReceipt {
            message_id,
            jid: jid.to_string(),
            sent_at: Utc::now(),
        })
    }

    async fn end(&self) {
        if self.tx.lock().await.take().is_some() {
            debug!("Loopback session ended");
        }
    }

    async fn logout(&self) -> WaResult<()> {
        info!("Loopback device unlinked");
        Ok(())
    }

    async fn request_pairing_code(&self, phone_number: &str) -> WaResult<String> {
        if phone_number.is_empty() {
            return Err(WaError::pairing_code_required());
        }
        Ok(generate_pairing_code())
    }

    async fn group_metadata(&self, group_jid: &str) -> WaResult<GroupMetadata> {
        if !jid::is_group_jid(group_jid) {
            return Err(WaError::invalid_parameter(format!(
                "{} is not a group JID",
                group_jid
            )));
        }
        Ok(GroupMetadata {
            id: group_jid.to_string(),
            subject: "Loopback group".into(),
            owner: None,
            creation: Utc::now().timestamp() as u64,
            participants: Vec::new(),
            description: None,
        })
    }
}

fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Message ids in the format WhatsApp Web uses for outgoing messages.
fn message_id() -> String {
    format!("3EB0{}", random_hex(12).to_uppercase())
}

fn qr_payload() -> String {
    format!(
        "2@{},{},{},{}",
        random_hex(16),
        random_hex(32),
        random_hex(32),
        random_hex(16)
    )
}

fn fresh_credentials() -> Credentials {
    Credentials(json!({
        "noiseKey": random_hex(32),
        "signedIdentityKey": random_hex(32),
        "registrationId": rand::thread_rng().next_u32() & 0x3fff,
        "registered": true,
        "me": { "id": format!("{}:1@{}", 10_000_000_000u64 + u64::from(rand::thread_rng().next_u32()), jid::USER_SERVER) },
    }))
}
