//! Image integrity verification
//!
//! [`ImageVerifier::verify`] is the only way to obtain a [`VerifiedImage`], and
//! the flash writer accepts nothing else. An image that fails verification is
//! consumed and dropped, so it can never reach storage.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::config::OtaConfig;
use crate::error::{ConfigError, VerificationError};
use crate::version::FirmwareVersion;

/// SHA-256 digest of a firmware image
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Sha256Digest([u8; 32]);

impl Sha256Digest {
    /// Wrap raw digest bytes
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Compute the digest of `data`
    pub fn compute(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Parse a 64-character hex digest
    pub fn from_hex(hex_digest: &str) -> Result<Self, hex::FromHexError> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(hex_digest.trim(), &mut bytes)?;
        Ok(Self(bytes))
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex form
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Compare in constant time
    pub fn ct_eq(&self, other: &Sha256Digest) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl std::fmt::Display for Sha256Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl std::fmt::Debug for Sha256Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sha256Digest({})", self.to_hex())
    }
}

impl TryFrom<String> for Sha256Digest {
    type Error = hex::FromHexError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<Sha256Digest> for String {
    fn from(digest: Sha256Digest) -> Self {
        digest.to_hex()
    }
}

/// What the release metadata promises about the image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedImage {
    /// Release version
    pub version: FirmwareVersion,

    /// Published size in bytes; zero when unknown
    pub size: u64,

    /// Published digest
    pub checksum: Option<Sha256Digest>,

    /// Detached Ed25519 signature over the digest
    pub signature: Option<[u8; 64]>,
}

/// An image whose integrity has been established
///
/// Only [`ImageVerifier`] constructs this type.
#[derive(Debug, Clone)]
pub struct VerifiedImage {
    version: FirmwareVersion,
    digest: Sha256Digest,
    data: Vec<u8>,
}

impl VerifiedImage {
    /// Version of the verified release
    pub fn version(&self) -> FirmwareVersion {
        self.version
    }

    /// Digest of the verified bytes
    pub fn digest(&self) -> Sha256Digest {
        self.digest
    }

    /// Verified image bytes
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Image size in bytes
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    /// Verified images are never empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Validates downloaded images before they are trusted
#[derive(Debug, Clone)]
pub struct ImageVerifier {
    verifying_key: Option<VerifyingKey>,
    require_checksum: bool,
}

impl ImageVerifier {
    /// Create a verifier
    pub fn new(verifying_key: Option<VerifyingKey>, require_checksum: bool) -> Self {
        Self {
            verifying_key,
            require_checksum,
        }
    }

    /// Create a verifier from the agent configuration
    pub fn from_config(config: &OtaConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(config.verifying_key()?, config.require_checksum))
    }

    /// Verify `image` against the published expectations
    ///
    /// Takes ownership of the bytes: on failure they are dropped here.
    pub fn verify(
        &self,
        image: Vec<u8>,
        expected: &ExpectedImage,
    ) -> Result<VerifiedImage, VerificationError> {
        if image.is_empty() {
            return Err(VerificationError::Empty);
        }

        let actual_size = image.len() as u64;
        if expected.size > 0 && actual_size != expected.size {
            return Err(VerificationError::SizeMismatch {
                expected: expected.size,
                actual: actual_size,
            });
        }

        let digest = Sha256Digest::compute(&image);

        match expected.checksum {
            Some(published) if !published.ct_eq(&digest) => {
                return Err(VerificationError::ChecksumMismatch {
                    expected: published.to_hex(),
                    actual: digest.to_hex(),
                });
            }
            Some(_) => debug!(digest = %digest, "Image checksum matches"),
            None if self.require_checksum => return Err(VerificationError::MissingChecksum),
            None => warn!(
                version = %expected.version,
                "No checksum published, accepting image on size alone"
            ),
        }

        if let Some(key) = &self.verifying_key {
            let signature_bytes = expected
                .signature
                .ok_or(VerificationError::MissingSignature)?;
            let signature = Signature::from_bytes(&signature_bytes);
            key.verify(digest.as_bytes(), &signature)
                .map_err(|e| VerificationError::InvalidSignature(e.to_string()))?;
            debug!(version = %expected.version, "Image signature verified");
        }

        Ok(VerifiedImage {
            version: expected.version,
            digest,
            data: image,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    fn expected_for(data: &[u8]) -> ExpectedImage {
        ExpectedImage {
            version: FirmwareVersion::new(1, 1, 0),
            size: data.len() as u64,
            checksum: Some(Sha256Digest::compute(data)),
            signature: None,
        }
    }

    #[test]
    fn test_digest_hex_known_value() -> Result<(), hex::FromHexError> {
        let digest = Sha256Digest::compute(b"test data");
        assert_eq!(
            digest.to_hex(),
            "916f0027a575074ce72a331777c3478d6513f786a591bd892da1a577bf2335f9"
        );
        assert_eq!(Sha256Digest::from_hex(&digest.to_hex())?, digest);
        assert!(Sha256Digest::from_hex("abcd").is_err());
        Ok(())
    }

    #[test]
    fn test_verify_pass() -> Result<(), VerificationError> {
        let data = b"firmware image v1.1.0".to_vec();
        let expected = expected_for(&data);
        let verified = ImageVerifier::new(None, true).verify(data.clone(), &expected)?;
        assert_eq!(verified.data(), data.as_slice());
        assert_eq!(verified.version(), FirmwareVersion::new(1, 1, 0));
        assert_eq!(Some(verified.digest()), expected.checksum);
        Ok(())
    }

    #[test]
    fn test_verify_checksum_mismatch() {
        let expected = expected_for(b"the real image");
        let result = ImageVerifier::new(None, true).verify(b"the fake image".to_vec(), &expected);
        assert!(matches!(
            result,
            Err(VerificationError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_verify_size_mismatch_and_empty() {
        let mut expected = expected_for(b"abc");
        expected.size = 10;
        let verifier = ImageVerifier::new(None, true);
        assert!(matches!(
            verifier.verify(b"abc".to_vec(), &expected),
            Err(VerificationError::SizeMismatch {
                expected: 10,
                actual: 3
            })
        ));
        assert!(matches!(
            verifier.verify(Vec::new(), &expected),
            Err(VerificationError::Empty)
        ));
    }

    #[test]
    fn test_verify_missing_checksum_policy() -> Result<(), VerificationError> {
        let mut expected = expected_for(b"image");
        expected.checksum = None;
        assert!(matches!(
            ImageVerifier::new(None, true).verify(b"image".to_vec(), &expected),
            Err(VerificationError::MissingChecksum)
        ));
        let verified = ImageVerifier::new(None, false).verify(b"image".to_vec(), &expected)?;
        assert_eq!(verified.len(), 5);
        Ok(())
    }

    #[test]
    fn test_verify_signature() -> Result<(), VerificationError> {
        let signing_key = SigningKey::from_bytes(&[7u8; 32]);
        let verifier = ImageVerifier::new(Some(signing_key.verifying_key()), true);

        let data = b"signed firmware".to_vec();
        let mut expected = expected_for(&data);
        assert!(matches!(
            verifier.verify(data.clone(), &expected),
            Err(VerificationError::MissingSignature)
        ));

        let digest = Sha256Digest::compute(&data);
        expected.signature = Some(signing_key.sign(digest.as_bytes()).to_bytes());
        verifier.verify(data.clone(), &expected)?;

        let other_key = SigningKey::from_bytes(&[9u8; 32]);
        expected.signature = Some(other_key.sign(digest.as_bytes()).to_bytes());
        assert!(matches!(
            verifier.verify(data, &expected),
            Err(VerificationError::InvalidSignature(_))
        ));
        Ok(())
    }
}
