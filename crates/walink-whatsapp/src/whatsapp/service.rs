//! High-level WhatsApp client facade.
//!
//! `WhatsAppClient` ties together the lifecycle manager, the template
//! registry, and the per-client caches, and exposes the send surface used
//! by embedding applications.

use crate::whatsapp::cache::ClientCaches;
use crate::whatsapp::config::ClientConfig;
use crate::whatsapp::credentials::{CredentialStore, FileCredentialStore};
use crate::whatsapp::error::{WaError, WaResult};
use crate::whatsapp::jid::normalize_jid;
use crate::whatsapp::lifecycle::ConnectionManager;
use crate::whatsapp::templates::{TemplateParams, TemplateRegistry};
use crate::whatsapp::transport::Transport;
use crate::whatsapp::types::*;
use log::{debug, error};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

/// Shared client handle for embedding applications.
pub type WhatsAppClientState = Arc<WhatsAppClient>;

/// One linked WhatsApp session plus its template catalogue.
pub struct WhatsAppClient {
    lifecycle: ConnectionManager,
    templates: Arc<TemplateRegistry>,
    caches: Arc<ClientCaches>,
}

impl WhatsAppClient {
    /// Client with a file-backed credential store at
    /// `config.auth_state_path` and the built-in templates.
    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        let store = Arc::new(FileCredentialStore::new(&config.auth_state_path));
        Self::with_parts(config, transport, store, TemplateRegistry::builtin())
    }

    /// Client with explicit collaborators. The registry is frozen here.
    pub fn with_parts(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        templates: TemplateRegistry,
    ) -> Self {
        let caches = Arc::new(ClientCaches::new(&config.cache));
        Self {
            lifecycle: ConnectionManager::new(config, transport, store, caches.clone()),
            templates: Arc::new(templates),
            caches,
        }
    }

    // ─── Lifecycle ───────────────────────────────────────────────────

    /// Connect and wait until the link is open.
    pub async fn initialize(&self) -> WaResult<()> {
        self.lifecycle.initialize().await
    }

    pub async fn disconnect(&self) {
        self.lifecycle.disconnect().await
    }

    /// Unlink this device and delete its stored credentials.
    pub async fn logout(&self) -> WaResult<()> {
        self.lifecycle.logout().await
    }

    pub fn state(&self) -> ConnectionState {
        self.lifecycle.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.lifecycle.watch_state()
    }

    /// Client events; subscribe before `initialize` to catch the QR code.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.lifecycle.subscribe()
    }

    pub fn reconnect_count(&self) -> u32 {
        self.lifecycle.reconnect_count()
    }

    // ─── Messaging ───────────────────────────────────────────────────

    /// Send arbitrary content to a recipient.
    ///
    /// The recipient may be a bare phone number or a full JID. Fails with
    /// `NotConnected` before touching the transport unless the link is open.
    pub async fn send_raw(
        &self,
        recipient: &str,
        content: MessageContent,
    ) -> WaResult<SendReceipt> {
        let handle = self
            .lifecycle
            .open_handle()
            .await
            .ok_or_else(WaError::not_connected)?;

        let jid = normalize_jid(recipient);
        if jid.starts_with('@') {
            return Err(WaError::invalid_parameter(format!(
                "Recipient '{}' has no phone number",
                recipient
            )));
        }

        debug!("Sending message to {}", jid);
        match handle.send_message(&jid, &content).await {
            Ok(receipt) => {
                self.caches.put_message(&receipt.message_id, content).await;
                Ok(receipt)
            }
            Err(e) => {
                error!("Failed to send message to {}: {}", jid, e);
                Err(e)
            }
        }
    }

    /// Render a registered template and send it as a text message.
    pub async fn send_template(
        &self,
        recipient: &str,
        template: &str,
        params: &TemplateParams,
    ) -> WaResult<SendReceipt> {
        let text = self.templates.render(template, params)?;
        self.send_raw(recipient, MessageContent::text(text)).await
    }

    /// Send plain text.
    pub async fn send_text(&self, recipient: &str, text: &str) -> WaResult<SendReceipt> {
        self.send_raw(recipient, MessageContent::text(text)).await
    }

    // ─── Lookups ─────────────────────────────────────────────────────

    /// Group metadata, from cache when fresh, otherwise from the transport.
    pub async fn group_metadata(&self, group_jid: &str) -> WaResult<GroupMetadata> {
        if let Some(meta) = self.caches.group(group_jid).await {
            debug!("Group metadata cache hit for {}", group_jid);
            return Ok(meta);
        }

        let handle = self
            .lifecycle
            .open_handle()
            .await
            .ok_or_else(WaError::not_connected)?;
        let meta = handle.group_metadata(group_jid).await?;
        self.caches.put_groups(std::slice::from_ref(&meta)).await;
        Ok(meta)
    }

    /// Content of a recently sent or received message.
    pub async fn cached_message(&self, message_id: &str) -> Option<MessageContent> {
        self.caches.message(message_id).await
    }

    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::whatsapp::loopback::LoopbackTransport;
    use crate::WaErrorCode;

    fn client(dir: &std::path::Path) -> (WhatsAppClient, Arc<LoopbackTransport>) {
        let transport = Arc::new(LoopbackTransport::new());
        let config = ClientConfig::with_auth_path(dir.join("auth").display().to_string());
        (WhatsAppClient::new(config, transport.clone()), transport)
    }

    fn params(pairs: &[(&str, &str)]) -> TemplateParams {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_send_requires_open_link() {
        let dir = tempfile::tempdir().unwrap();
        let (client, transport) = client(dir.path());

        let err = client
            .send_text("94771234567", "hello")
            .await
            .unwrap_err();
        assert_eq!(err.code, WaErrorCode::NotConnected);
        assert_eq!(transport.connect_count(), 0);
        assert!(transport.sent().await.is_empty());
    }

    #[tokio::test]
    async fn test_send_template_normalizes_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        let (client, transport) = client(dir.path());
        client.initialize().await.unwrap();
        assert_eq!(client.state(), ConnectionState::Open);

        let receipt = client
            .send_template(
                "+94 77 123 4567",
                "verificationCode",
                &params(&[("code", "123456")]),
            )
            .await
            .unwrap();

        assert_eq!(receipt.jid, "94771234567@s.whatsapp.net");
        let sent = transport.sent().await;
        assert_eq!(sent.len(), 1);
        assert!(sent[0].content.as_text().unwrap().contains("123456"));
        assert_eq!(
            client.cached_message(&receipt.message_id).await,
            Some(sent[0].content.clone())
        );

        client.disconnect().await;
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_unknown_template_never_reaches_transport() {
        let dir = tempfile::tempdir().unwrap();
        let (client, transport) = client(dir.path());
        client.initialize().await.unwrap();

        let err = client
            .send_template("94771234567", "nonexistent", &TemplateParams::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, WaErrorCode::TemplateNotFound);
        assert!(transport.sent().await.is_empty());
    }

    #[tokio::test]
    async fn test_credentials_persist_across_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let (client, _) = client(dir.path());
        let mut events = client.subscribe();

        client.initialize().await.unwrap();
        assert!(dir.path().join("auth").join("creds.json").exists());

        let mut saw_qr = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, ClientEvent::Qr(_)) {
                saw_qr = true;
            }
        }
        assert!(saw_qr);

        client.disconnect().await;
        client.initialize().await.unwrap();
        while let Ok(event) = events.try_recv() {
            assert!(!matches!(event, ClientEvent::Qr(_)), "restored session asked for a QR");
        }
    }

    #[tokio::test]
    async fn test_group_metadata_cache_first() {
        let dir = tempfile::tempdir().unwrap();
        let (client, _) = client(dir.path());
        client.initialize().await.unwrap();

        let meta = client.group_metadata("123-456@g.us").await.unwrap();
        client.disconnect().await;

        let cached = client.group_metadata("123-456@g.us").await.unwrap();
        assert_eq!(cached, meta);
        let err = client.group_metadata("999@g.us").await.unwrap_err();
        assert_eq!(err.code, WaErrorCode::NotConnected);
    }

    #[tokio::test]
    async fn test_logout_purges_auth_dir() {
        let dir = tempfile::tempdir().unwrap();
        let (client, _) = client(dir.path());
        client.initialize().await.unwrap();
        assert!(dir.path().join("auth").exists());

        client.logout().await.unwrap();
        assert!(!dir.path().join("auth").exists());
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }
}
