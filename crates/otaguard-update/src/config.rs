//! Immutable agent configuration
//!
//! One [`OtaConfig`] is built at startup and handed to every component. No
//! component reads global state. Durations are serialized in milliseconds.

use std::time::Duration;

use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::version::FirmwareVersion;

/// Configuration of the remote release source
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ReleaseSourceConfig {
    /// Repository owner
    pub owner: String,

    /// Repository name
    pub repo: String,

    /// Access token for private repositories; empty for public access
    pub token: String,

    /// Base URL of the release API
    pub api_base: String,

    /// Suffix identifying the firmware asset among the release assets
    pub asset_suffix: String,
}

impl Default for ReleaseSourceConfig {
    fn default() -> Self {
        Self {
            owner: String::new(),
            repo: String::new(),
            token: String::new(),
            api_base: "https://api.github.com".to_string(),
            asset_suffix: ".bin".to_string(),
        }
    }
}

impl ReleaseSourceConfig {
    /// Create a source for the given repository
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            ..Default::default()
        }
    }

    /// Set the access token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = token.into();
        self
    }

    /// Set the API base URL
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Set the asset suffix
    pub fn with_asset_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.asset_suffix = suffix.into();
        self
    }

    /// Token when private access is configured
    pub fn bearer_token(&self) -> Option<&str> {
        let token = self.token.trim();
        (!token.is_empty()).then_some(token)
    }

    /// URL of the latest-release endpoint
    pub fn latest_release_url(&self) -> String {
        format!(
            "{}/repos/{}/{}/releases/latest",
            self.api_base.trim_end_matches('/'),
            self.owner,
            self.repo
        )
    }
}

impl std::fmt::Debug for ReleaseSourceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleaseSourceConfig")
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .field("token", &if self.token.is_empty() { "" } else { "<redacted>" })
            .field("api_base", &self.api_base)
            .field("asset_suffix", &self.asset_suffix)
            .finish()
    }
}

/// Flash geometry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FlashLayout {
    /// Capacity of each firmware slot in bytes
    pub slot_size: u64,

    /// Size of each persistent record sector in bytes
    pub record_sector_size: u64,

    /// Bytes programmed per write operation
    pub write_chunk: usize,
}

impl Default for FlashLayout {
    fn default() -> Self {
        Self {
            slot_size: 1024 * 1024,
            record_sector_size: 4096,
            write_chunk: 4096,
        }
    }
}

/// Complete agent configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct OtaConfig {
    /// Version of the factory image; seeds the persistent record at first boot
    pub current_version: FirmwareVersion,

    /// Release source identity
    pub release: ReleaseSourceConfig,

    /// Period between update checks
    #[serde(rename = "check_interval_ms", with = "duration_ms")]
    pub check_interval: Duration,

    /// Maximum download attempts per cycle
    pub max_download_retries: u32,

    /// Upper bound for one network attempt
    #[serde(rename = "connection_timeout_ms", with = "duration_ms")]
    pub connection_timeout: Duration,

    /// Pause before the first download retry; doubles per further retry
    #[serde(rename = "retry_backoff_ms", with = "duration_ms")]
    pub retry_backoff: Duration,

    /// Cap for the retry pause
    #[serde(rename = "max_retry_backoff_ms", with = "duration_ms")]
    pub max_retry_backoff: Duration,

    /// Unconfirmed boots tolerated before rolling back
    pub max_boot_attempts: u32,

    /// Periodic update checks enabled
    pub auto_update: bool,

    /// Boot-time rollback enabled
    pub rollback: bool,

    /// Emit progress and status lines
    pub status_logging: bool,

    /// Refuse releases that publish no checksum
    pub require_checksum: bool,

    /// Confirm the running image after the first successful release query
    pub confirm_on_first_check: bool,

    /// Request a reboot as soon as a switch has been committed
    pub reboot_after_flash: bool,

    /// Hex-encoded Ed25519 public key; when set, images must be signed
    pub signing_public_key: Option<String>,

    /// Flash geometry
    pub flash: FlashLayout,
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            current_version: FirmwareVersion::new(1, 0, 0),
            release: ReleaseSourceConfig::default(),
            check_interval: Duration::from_millis(300_000),
            max_download_retries: 3,
            connection_timeout: Duration::from_millis(10_000),
            retry_backoff: Duration::from_millis(2_000),
            max_retry_backoff: Duration::from_millis(30_000),
            max_boot_attempts: 3,
            auto_update: true,
            rollback: true,
            status_logging: true,
            require_checksum: true,
            confirm_on_first_check: true,
            reboot_after_flash: true,
            signing_public_key: None,
            flash: FlashLayout::default(),
        }
    }
}

impl OtaConfig {
    /// Create a configuration for the given release source and running version
    pub fn new(release: ReleaseSourceConfig, current_version: FirmwareVersion) -> Self {
        Self {
            release,
            current_version,
            ..Default::default()
        }
    }

    /// Set the check interval
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Set the maximum download attempts per cycle
    pub fn with_max_download_retries(mut self, retries: u32) -> Self {
        self.max_download_retries = retries;
        self
    }

    /// Set the connection timeout
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the base retry pause
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Set the tolerated unconfirmed boots
    pub fn with_max_boot_attempts(mut self, attempts: u32) -> Self {
        self.max_boot_attempts = attempts;
        self
    }

    /// Enable or disable periodic update checks
    pub fn with_auto_update(mut self, enabled: bool) -> Self {
        self.auto_update = enabled;
        self
    }

    /// Enable or disable boot-time rollback
    pub fn with_rollback(mut self, enabled: bool) -> Self {
        self.rollback = enabled;
        self
    }

    /// Set whether releases without a checksum are refused
    pub fn with_require_checksum(mut self, required: bool) -> Self {
        self.require_checksum = required;
        self
    }

    /// Set whether the first successful check confirms the running image
    pub fn with_confirm_on_first_check(mut self, confirm: bool) -> Self {
        self.confirm_on_first_check = confirm;
        self
    }

    /// Set whether a committed switch triggers a reboot request
    pub fn with_reboot_after_flash(mut self, reboot: bool) -> Self {
        self.reboot_after_flash = reboot;
        self
    }

    /// Set the image signing key (hex)
    pub fn with_signing_public_key(mut self, key_hex: impl Into<String>) -> Self {
        self.signing_public_key = Some(key_hex.into());
        self
    }

    /// Set the flash geometry
    pub fn with_flash_layout(mut self, layout: FlashLayout) -> Self {
        self.flash = layout;
        self
    }

    /// Pause before retry number `attempt` (1-based count of failed attempts)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.retry_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_retry_backoff)
    }

    /// Decode the configured signing key
    pub fn verifying_key(&self) -> Result<Option<VerifyingKey>, ConfigError> {
        let Some(key_hex) = self.signing_public_key.as_deref() else {
            return Ok(None);
        };

        let invalid = |reason: String| ConfigError::Invalid {
            field: "signing_public_key",
            reason,
        };

        let bytes = hex::decode(key_hex.trim()).map_err(|e| invalid(e.to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| invalid(format!("expected 32 bytes, got {}", b.len())))?;
        VerifyingKey::from_bytes(&bytes)
            .map(Some)
            .map_err(|e| invalid(e.to_string()))
    }

    /// Check the configuration for values the core cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: &str) -> ConfigError {
            ConfigError::Invalid {
                field,
                reason: reason.to_string(),
            }
        }

        if self.release.owner.trim().is_empty() {
            return Err(invalid("release.owner", "must not be empty"));
        }
        if self.release.repo.trim().is_empty() {
            return Err(invalid("release.repo", "must not be empty"));
        }
        if !self.release.api_base.starts_with("http://")
            && !self.release.api_base.starts_with("https://")
        {
            return Err(invalid("release.api_base", "must be an http(s) URL"));
        }
        if self.check_interval.is_zero() {
            return Err(invalid("check_interval_ms", "must be greater than zero"));
        }
        if self.connection_timeout.is_zero() {
            return Err(invalid("connection_timeout_ms", "must be greater than zero"));
        }
        if self.max_download_retries == 0 {
            return Err(invalid("max_download_retries", "must be at least 1"));
        }
        if self.max_boot_attempts == 0 {
            return Err(invalid("max_boot_attempts", "must be at least 1"));
        }
        if self.flash.slot_size == 0 {
            return Err(invalid("flash.slot_size", "must be greater than zero"));
        }
        if self.flash.write_chunk == 0 || self.flash.write_chunk as u64 > self.flash.slot_size {
            return Err(invalid(
                "flash.write_chunk",
                "must be between 1 and the slot size",
            ));
        }
        if self.flash.record_sector_size < crate::record::RECORD_LEN as u64 {
            return Err(invalid(
                "flash.record_sector_size",
                "must hold at least one record",
            ));
        }

        self.verifying_key()?;
        Ok(())
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
