//! Release source client
//!
//! Queries the latest release of a repository and extracts the firmware asset.
//! One request per call; retry policy belongs to the caller.
//!
//! # Integrity data
//!
//! The checksum is taken, in order of preference, from:
//! 1. the asset `digest` field (`sha256:<hex>`)
//! 2. a release body line `sha256: <hex>`
//! 3. a release body line `<hex>  <asset name>` (`sha256sum` output)
//!
//! An optional body line `ed25519: <base64>` carries a detached signature over
//! the SHA-256 digest.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{OtaConfig, ReleaseSourceConfig};
use crate::error::{ApiError, ConfigError};
use crate::verify::{ExpectedImage, Sha256Digest};
use crate::version::FirmwareVersion;

/// Metadata of the latest published release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseMetadata {
    /// Firmware version derived from the release tag
    pub version: FirmwareVersion,

    /// Raw release tag
    pub tag: String,

    /// Name of the selected asset
    pub asset_name: String,

    /// Download location of the asset
    pub asset_location: String,

    /// Published asset size in bytes; zero when unknown
    pub asset_size: u64,

    /// Published SHA-256 digest
    pub checksum: Option<Sha256Digest>,

    /// Detached Ed25519 signature over the digest
    #[serde(skip)]
    pub signature: Option<[u8; 64]>,
}

impl ReleaseMetadata {
    /// Expectations the downloaded image must meet
    pub fn expected_image(&self) -> ExpectedImage {
        ExpectedImage {
            version: self.version,
            size: self.asset_size,
            checksum: self.checksum,
            signature: self.signature,
        }
    }
}

/// Source of release metadata
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    /// Fetch metadata of the latest release
    async fn fetch_latest_release(&self) -> Result<ReleaseMetadata, ApiError>;
}

#[derive(Debug, Deserialize)]
struct ReleaseResponse {
    tag_name: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    assets: Vec<AssetResponse>,
}

#[derive(Debug, Deserialize)]
struct AssetResponse {
    name: String,
    #[serde(default)]
    browser_download_url: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    digest: Option<String>,
}

/// Options controlling how a release document is interpreted
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Suffix identifying the firmware asset
    pub asset_suffix: String,

    /// Prefer the API asset URL (needed for authenticated downloads)
    pub private_access: bool,

    /// Fail when no checksum is published
    pub require_checksum: bool,
}

/// Interpret a release document
pub fn parse_release(body: &[u8], options: &ParseOptions) -> Result<ReleaseMetadata, ApiError> {
    let release: ReleaseResponse =
        serde_json::from_slice(body).map_err(|e| ApiError::Malformed(e.to_string()))?;

    let tag = release
        .tag_name
        .filter(|t| !t.trim().is_empty())
        .ok_or(ApiError::MissingField("tag_name"))?;

    let version = FirmwareVersion::parse(&tag).map_err(|source| ApiError::InvalidVersion {
        tag: tag.clone(),
        source,
    })?;

    let asset = release
        .assets
        .iter()
        .find(|a| a.name.ends_with(options.asset_suffix.as_str()))
        .ok_or(ApiError::MissingField("assets"))?;

    let public_url = asset.browser_download_url.as_deref();
    let api_url = asset.url.as_deref();
    let location = if options.private_access {
        api_url.or(public_url)
    } else {
        public_url.or(api_url)
    }
    .filter(|u| !u.is_empty())
    .ok_or(ApiError::MissingField("browser_download_url"))?
    .to_string();

    let release_body = release.body.as_deref().unwrap_or_default();

    let checksum = match asset.digest.as_deref() {
        Some(digest) => Some(parse_asset_digest(digest)?),
        None => checksum_from_body(release_body, &asset.name)?,
    };

    if checksum.is_none() && options.require_checksum {
        return Err(ApiError::MissingField("checksum"));
    }

    let signature = signature_from_body(release_body)?;

    Ok(ReleaseMetadata {
        version,
        tag,
        asset_name: asset.name.clone(),
        asset_location: location,
        asset_size: asset.size,
        checksum,
        signature,
    })
}

fn parse_asset_digest(digest: &str) -> Result<Sha256Digest, ApiError> {
    let hex_digest = digest.strip_prefix("sha256:").ok_or_else(|| {
        ApiError::InvalidIntegrityData(format!("unsupported digest algorithm: {}", digest))
    })?;
    Sha256Digest::from_hex(hex_digest)
        .map_err(|e| ApiError::InvalidIntegrityData(format!("asset digest: {}", e)))
}

fn checksum_from_body(body: &str, asset_name: &str) -> Result<Option<Sha256Digest>, ApiError> {
    for line in body.lines().map(str::trim) {
        if let Some(rest) = strip_label(line, "sha256") {
            return Sha256Digest::from_hex(rest)
                .map(Some)
                .map_err(|e| ApiError::InvalidIntegrityData(format!("body checksum: {}", e)));
        }

        let mut fields = line.split_whitespace();
        if let (Some(hash), Some(name)) = (fields.next(), fields.next())
            && name.trim_start_matches('*') == asset_name
            && hash.len() == 64
            && let Ok(digest) = Sha256Digest::from_hex(hash)
        {
            return Ok(Some(digest));
        }
    }
    Ok(None)
}

fn signature_from_body(body: &str) -> Result<Option<[u8; 64]>, ApiError> {
    let Some(encoded) = body.lines().map(str::trim).find_map(|l| strip_label(l, "ed25519"))
    else {
        return Ok(None);
    };

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| ApiError::InvalidIntegrityData(format!("signature: {}", e)))?;
    let signature: [u8; 64] = bytes.try_into().map_err(|b: Vec<u8>| {
        ApiError::InvalidIntegrityData(format!("signature must be 64 bytes, got {}", b.len()))
    })?;
    Ok(Some(signature))
}

/// Strip a case-insensitive `label:` prefix
fn strip_label<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    let (head, rest) = line.split_once(':')?;
    head.trim()
        .eq_ignore_ascii_case(label)
        .then(|| rest.trim())
        .filter(|r| !r.is_empty())
}

/// HTTP client for the release API
#[derive(Debug, Clone)]
pub struct ReleaseClient {
    client: Client,
    source: ReleaseSourceConfig,
    require_checksum: bool,
}

impl ReleaseClient {
    /// Create a release client from the agent configuration
    pub fn new(config: &OtaConfig) -> Result<Self, ConfigError> {
        Self::with_source(
            config.release.clone(),
            config.connection_timeout,
            config.require_checksum,
        )
    }

    /// Create a release client for an explicit source
    pub fn with_source(
        source: ReleaseSourceConfig,
        timeout: Duration,
        require_checksum: bool,
    ) -> Result<Self, ConfigError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .default_headers(headers)
            .user_agent(concat!("otaguard/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            client,
            source,
            require_checksum,
        })
    }

    /// Configured source
    pub fn source(&self) -> &ReleaseSourceConfig {
        &self.source
    }
}

#[async_trait]
impl ReleaseSource for ReleaseClient {
    async fn fetch_latest_release(&self) -> Result<ReleaseMetadata, ApiError> {
        let url = self.source.latest_release_url();
        info!("Checking for firmware release at {}", url);

        let mut request = self.client.get(&url);
        if let Some(token) = self.source.bearer_token() {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let metadata = parse_release(
            &body,
            &ParseOptions {
                asset_suffix: self.source.asset_suffix.clone(),
                private_access: self.source.bearer_token().is_some(),
                require_checksum: self.require_checksum,
            },
        )?;

        debug!(
            version = %metadata.version,
            asset = %metadata.asset_name,
            size = metadata.asset_size,
            "Parsed release metadata"
        );
        Ok(metadata)
    }
}
