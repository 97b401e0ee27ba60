//! Client configuration.
//!
//! Every field has a default so a partial JSON file is enough.

use crate::whatsapp::error::{WaError, WaResult};
use crate::whatsapp::pairing::PairingMethod;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default directory for persisted credentials.
pub const DEFAULT_AUTH_PATH: &str = "auth_info_baileys";

/// WhatsApp Web client version announced to the transport.
pub const WA_WEB_VERSION: [u32; 3] = [2, 3000, 1015901307];

/// Top-level configuration for a [`WhatsAppClient`](crate::WhatsAppClient).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    /// Directory holding the persisted auth state.
    pub auth_state_path: String,
    /// Browser description (name, platform, version).
    pub browser: (String, String, String),
    /// Protocol version passed to the transport.
    pub version: [u32; 3],
    /// QR scan or phone-number pairing code.
    pub pairing_method: PairingMethod,
    /// Required when `pairing_method` is `PhoneNumber`.
    pub phone_number: Option<String>,
    pub reconnect: ReconnectPolicy,
    /// Seconds to wait for the link to open before abandoning an attempt.
    pub open_timeout_secs: u64,
    pub cache: CacheConfig,
    /// Capacity of the broadcast channel for client events.
    pub event_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            auth_state_path: DEFAULT_AUTH_PATH.into(),
            browser: ("walink".into(), "Chrome".into(), "1.0.0".into()),
            version: WA_WEB_VERSION,
            pairing_method: PairingMethod::QrCode,
            phone_number: None,
            reconnect: ReconnectPolicy::default(),
            open_timeout_secs: 120,
            cache: CacheConfig::default(),
            event_buffer: 256,
        }
    }
}

impl ClientConfig {
    /// Configuration with a custom auth directory and defaults elsewhere.
    pub fn with_auth_path(path: impl Into<String>) -> Self {
        Self {
            auth_state_path: path.into(),
            ..Default::default()
        }
    }

    /// Load a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> WaResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            WaError::invalid_parameter(format!("Cannot read config {}", path.display()))
                .with_details(e.to_string())
        })?;
        let cfg: ClientConfig = serde_json::from_str(&raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject combinations that can never connect.
    pub fn validate(&self) -> WaResult<()> {
        if self.pairing_method == PairingMethod::PhoneNumber
            && self
                .phone_number
                .as_deref()
                .map(|p| p.chars().all(|c| !c.is_ascii_digit()))
                .unwrap_or(true)
        {
            return Err(WaError::pairing_code_required());
        }
        if self.auth_state_path.trim().is_empty() {
            return Err(WaError::invalid_parameter("authStatePath must not be empty"));
        }
        Ok(())
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_secs(self.open_timeout_secs)
    }
}

/// Reconnection policy for transient closes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectPolicy {
    /// Consecutive failed attempts before giving up; `None` retries forever.
    pub max_attempts: Option<u32>,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Some(10),
            base_delay_ms: 3000,
            max_delay_ms: 60_000,
        }
    }
}

impl ReconnectPolicy {
    /// Exponential back-off for the given 1-based attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let ms = self
            .base_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }

    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.map(|max| attempts > max).unwrap_or(false)
    }
}

/// Sizing for the per-client caches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
    pub group_ttl_secs: u64,
    pub group_max_entries: usize,
    pub message_ttl_secs: u64,
    pub message_max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            group_ttl_secs: 300,
            group_max_entries: 1000,
            message_ttl_secs: 3600,
            message_max_entries: 5000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.auth_state_path, DEFAULT_AUTH_PATH);
        assert_eq!(cfg.reconnect.max_attempts, Some(10));
        assert_eq!(cfg.pairing_method, PairingMethod::QrCode);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg: ClientConfig =
            serde_json::from_str(r#"{ "authStatePath": "/tmp/wa", "reconnect": { "maxAttempts": 2 } }"#)
                .unwrap();
        assert_eq!(cfg.auth_state_path, "/tmp/wa");
        assert_eq!(cfg.reconnect.max_attempts, Some(2));
        assert_eq!(cfg.reconnect.base_delay_ms, 3000);
        assert_eq!(cfg.open_timeout_secs, 120);
    }

    #[test]
    fn test_phone_pairing_requires_number() {
        let mut cfg = ClientConfig {
            pairing_method: PairingMethod::PhoneNumber,
            ..Default::default()
        };
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.code, crate::WaErrorCode::PairingCodeRequired);

        cfg.phone_number = Some("+94 77 123 4567".into());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = ReconnectPolicy {
            max_attempts: Some(3),
            base_delay_ms: 1000,
            max_delay_ms: 5000,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(4000));
        assert_eq!(policy.delay_for(4), Duration::from_millis(5000));
        assert_eq!(policy.delay_for(60), Duration::from_millis(5000));
    }

    #[test]
    fn test_exhausted() {
        let capped = ReconnectPolicy::default();
        assert!(!capped.exhausted(10));
        assert!(capped.exhausted(11));

        let unbounded = ReconnectPolicy {
            max_attempts: None,
            ..Default::default()
        };
        assert!(!unbounded.exhausted(u32::MAX));
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("walink.json");
        std::fs::write(&path, r#"{ "eventBuffer": 8 }"#).unwrap();
        let cfg = ClientConfig::from_json_file(&path).unwrap();
        assert_eq!(cfg.event_buffer, 8);

        let missing = ClientConfig::from_json_file(dir.path().join("nope.json"));
        assert!(missing.is_err());
    }
}
