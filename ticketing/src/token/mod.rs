//! Admission tokens.
//!
//! A token binds a ticket code to an expiry. The wire value printed in the
//! QR code is
//!
//! ```text
//! b64url(nonce) ":" b64url(ciphertext) ":" b64url(tag) ":" b64url(hmac[..16])
//! ```
//!
//! - Payload: JSON `{token_id, ticket_code, expires_at, format_version}`
//! - AES-256-GCM with a fresh 96-bit nonce per token, 128-bit tag
//! - HMAC-SHA256 over the first three segments (the text, not the bytes),
//!   truncated to 128 bits
//!
//! Verification checks the signature in constant time before touching the
//! ciphertext. Expiry is reported, not enforced: an expired token still
//! verifies with `is_expired = true`.

mod policy;
mod render;

pub use policy::{TokenAudience, TokenExpiryPolicy};
pub use render::{BarcodeRenderer, QrRenderer};

use crate::config::TokenConfig;
use crate::error::{Result, TicketingError};
use crate::metrics;
use crate::types::{AdmissionArtifact, TicketCode, TokenId};
use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use std::sync::Arc;
use tessera_core::environment::Clock;
use thiserror::Error;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// Current payload format.
pub const FORMAT_VERSION: u8 = 1;

/// Longest wire value accepted by [`AdmissionTokenService::verify`].
pub const MAX_WIRE_LEN: usize = 4_096;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const SIGNATURE_LEN: usize = 16;

/// Token verification failures.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    /// Signature missing, undecodable or wrong. Hard failure: possible forgery.
    #[error("Token signature invalid")]
    SignatureInvalid,

    /// Signature valid but the body does not decrypt or parse.
    #[error("Token decryption failed")]
    DecryptionFailed,

    /// Empty or oversized input.
    #[error("Token malformed")]
    Malformed,
}

impl TokenError {
    /// Label used for the verification outcome metric
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SignatureInvalid => "signature_invalid",
            Self::DecryptionFailed => "decryption_failed",
            Self::Malformed => "malformed",
        }
    }
}

/// Decrypted token contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPayload {
    /// Token id
    pub token_id: TokenId,
    /// Ticket the token admits
    pub ticket_code: TicketCode,
    /// Expiry
    pub expires_at: DateTime<Utc>,
    /// Payload format
    pub format_version: u8,
}

/// A freshly issued token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    /// Token id
    pub token_id: TokenId,
    /// Wire value encoded in the barcode
    pub wire_value: String,
    /// Rendered PNG
    pub image_png: Vec<u8>,
    /// Expiry
    pub expires_at: DateTime<Utc>,
}

impl IssuedToken {
    /// Splits into the token id and the artifact stored on a ticket
    #[must_use]
    pub fn into_artifact(self) -> (TokenId, AdmissionArtifact) {
        (
            self.token_id,
            AdmissionArtifact {
                wire_value: self.wire_value,
                image_png: self.image_png,
                expires_at: self.expires_at,
            },
        )
    }
}

/// Result of a successful verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedToken {
    /// Decrypted payload
    pub payload: TokenPayload,
    /// `now >= expires_at`
    pub is_expired: bool,
    /// Seconds until expiry, negative once expired
    pub remaining_seconds: i64,
}

/// Encryption and signing keys.
#[derive(Clone)]
pub struct TokenKeys {
    encryption: [u8; KEY_LEN],
    signing: [u8; KEY_LEN],
}

impl TokenKeys {
    /// Creates keys from raw bytes
    #[must_use]
    pub const fn new(encryption: [u8; KEY_LEN], signing: [u8; KEY_LEN]) -> Self {
        Self {
            encryption,
            signing,
        }
    }

    /// Random keys for development. Tokens do not survive a restart.
    #[must_use]
    pub fn ephemeral() -> Self {
        Self::new(rand::random(), rand::random())
    }

    /// Decodes base64 keys from configuration.
    ///
    /// Falls back to [`ephemeral`](Self::ephemeral) keys, with a warning,
    /// when either key is missing.
    ///
    /// # Errors
    ///
    /// [`TicketingError::Configuration`] when a key is not base64 or not 32 bytes.
    pub fn from_config(config: &TokenConfig) -> Result<Self> {
        match (&config.encryption_key, &config.signing_key) {
            (Some(encryption), Some(signing)) => Ok(Self::new(
                decode_key("TOKEN_ENCRYPTION_KEY", encryption)?,
                decode_key("TOKEN_SIGNING_KEY", signing)?,
            )),
            _ => {
                warn!("Token keys not configured, using ephemeral keys (development only)");
                Ok(Self::ephemeral())
            }
        }
    }
}

impl fmt::Debug for TokenKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TokenKeys(<redacted>)")
    }
}

fn decode_key(name: &str, value: &str) -> Result<[u8; KEY_LEN]> {
    let bytes = STANDARD
        .decode(value.trim())
        .map_err(|e| TicketingError::Configuration(format!("{name} is not valid base64: {e}")))?;
    <[u8; KEY_LEN]>::try_from(bytes.as_slice()).map_err(|_| {
        TicketingError::Configuration(format!(
            "{name} must be {KEY_LEN} bytes, got {}",
            bytes.len()
        ))
    })
}

/// Issues, verifies and renders admission tokens.
pub struct AdmissionTokenService {
    cipher: Aes256Gcm,
    signing_key: [u8; KEY_LEN],
    renderer: Arc<dyn BarcodeRenderer>,
    clock: Arc<dyn Clock>,
}

impl AdmissionTokenService {
    /// Creates a service rendering QR codes.
    #[must_use]
    pub fn new(keys: &TokenKeys, clock: Arc<dyn Clock>) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&keys.encryption)),
            signing_key: keys.signing,
            renderer: Arc::new(QrRenderer::default()),
            clock,
        }
    }

    /// Creates a service from configuration.
    ///
    /// # Errors
    ///
    /// [`TicketingError::Configuration`] on malformed keys.
    pub fn from_config(config: &TokenConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        Ok(Self::new(&TokenKeys::from_config(config)?, clock))
    }

    /// Replaces the barcode renderer
    #[must_use]
    pub fn with_renderer(mut self, renderer: Arc<dyn BarcodeRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Current time from the injected clock
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Issues a token valid for `ttl_minutes` from now.
    ///
    /// CPU-bound; async callers should run it on the blocking pool.
    ///
    /// # Errors
    ///
    /// [`TicketingError::Render`] when encryption or rendering fails.
    pub fn issue(&self, ticket_code: &TicketCode, ttl_minutes: i64) -> Result<IssuedToken> {
        let expires_at = Duration::try_minutes(ttl_minutes)
            .and_then(|ttl| self.clock.now().checked_add_signed(ttl))
            .ok_or_else(|| TicketingError::Render(format!("token lifetime {ttl_minutes}m out of range")))?;
        self.issue_until(ticket_code, expires_at)
    }

    /// Issues a token valid until `expires_at`.
    ///
    /// # Errors
    ///
    /// [`TicketingError::Render`] when encryption or rendering fails.
    pub fn issue_until(
        &self,
        ticket_code: &TicketCode,
        expires_at: DateTime<Utc>,
    ) -> Result<IssuedToken> {
        self.issue_with_id(TokenId::new(), ticket_code, expires_at)
    }

    /// Issues a token with a pre-allocated id.
    ///
    /// # Errors
    ///
    /// [`TicketingError::Render`] when encryption or rendering fails.
    pub fn issue_with_id(
        &self,
        token_id: TokenId,
        ticket_code: &TicketCode,
        expires_at: DateTime<Utc>,
    ) -> Result<IssuedToken> {
        let payload = TokenPayload {
            token_id,
            ticket_code: ticket_code.clone(),
            expires_at,
            format_version: FORMAT_VERSION,
        };
        let wire_value = self.seal(&payload)?;
        let image_png = self.renderer.render(&wire_value)?;
        Ok(IssuedToken {
            token_id,
            wire_value,
            image_png,
            expires_at,
        })
    }

    /// Encrypts and signs a payload into its wire value.
    ///
    /// # Errors
    ///
    /// [`TicketingError::Render`] when the payload cannot be encoded or encrypted.
    pub fn seal(&self, payload: &TokenPayload) -> Result<String> {
        let plaintext = serde_json::to_vec(payload)
            .map_err(|e| TicketingError::Render(format!("token payload encoding: {e}")))?;

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher
            .encrypt(&nonce, plaintext.as_slice())
            .map_err(|e| TicketingError::Render(format!("token encryption: {e}")))?;
        let (ciphertext, tag) = sealed.split_at(sealed.len().saturating_sub(TAG_LEN));

        let body = format!(
            "{}:{}:{}",
            URL_SAFE_NO_PAD.encode(nonce),
            URL_SAFE_NO_PAD.encode(ciphertext),
            URL_SAFE_NO_PAD.encode(tag)
        );
        let signature = self
            .sign(&body)
            .map_err(|_| TicketingError::Render("token signing key rejected".into()))?;
        Ok(format!("{body}:{}", URL_SAFE_NO_PAD.encode(signature)))
    }

    /// Verifies a wire value.
    ///
    /// # Errors
    ///
    /// - [`TokenError::Malformed`]: empty or longer than [`MAX_WIRE_LEN`]
    /// - [`TokenError::SignatureInvalid`]: missing, undecodable or mismatched signature
    /// - [`TokenError::DecryptionFailed`]: signature valid, body unusable
    pub fn verify(&self, wire: &str) -> std::result::Result<VerifiedToken, TokenError> {
        let outcome = self.open(wire);
        match &outcome {
            Ok(_) => metrics::record_token_verification("valid"),
            Err(error) => {
                warn!(outcome = error.as_str(), "Admission token rejected");
                metrics::record_token_verification(error.as_str());
            }
        }
        let payload = outcome?;

        let now = self.clock.now();
        Ok(VerifiedToken {
            is_expired: now >= payload.expires_at,
            remaining_seconds: (payload.expires_at - now).num_seconds(),
            payload,
        })
    }

    fn open(&self, wire: &str) -> std::result::Result<TokenPayload, TokenError> {
        if wire.is_empty() || wire.len() > MAX_WIRE_LEN {
            return Err(TokenError::Malformed);
        }

        let (body, signature) = wire.rsplit_once(':').ok_or(TokenError::SignatureInvalid)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| TokenError::SignatureInvalid)?;
        let expected = self.sign(body).map_err(|_| TokenError::SignatureInvalid)?;
        if !constant_time_eq::constant_time_eq(&signature, &expected) {
            return Err(TokenError::SignatureInvalid);
        }

        let mut segments = body.split(':');
        let (Some(nonce), Some(ciphertext), Some(tag), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(TokenError::DecryptionFailed);
        };
        let decode = |segment: &str| {
            URL_SAFE_NO_PAD
                .decode(segment)
                .map_err(|_| TokenError::DecryptionFailed)
        };
        let nonce = decode(nonce)?;
        let mut sealed = decode(ciphertext)?;
        let tag = decode(tag)?;
        if nonce.len() != NONCE_LEN || tag.len() != TAG_LEN {
            return Err(TokenError::DecryptionFailed);
        }
        sealed.extend_from_slice(&tag);

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce), sealed.as_slice())
            .map_err(|_| TokenError::DecryptionFailed)?;
        let payload: TokenPayload =
            serde_json::from_slice(&plaintext).map_err(|_| TokenError::DecryptionFailed)?;
        if payload.format_version != FORMAT_VERSION {
            return Err(TokenError::DecryptionFailed);
        }
        Ok(payload)
    }

    fn sign(
        &self,
        body: &str,
    ) -> std::result::Result<[u8; SIGNATURE_LEN], hmac::digest::InvalidLength> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.signing_key)?;
        mac.update(body.as_bytes());
        let digest = mac.finalize().into_bytes();
        let mut truncated = [0u8; SIGNATURE_LEN];
        truncated.copy_from_slice(&digest[..SIGNATURE_LEN]);
        Ok(truncated)
    }
}

impl fmt::Debug for AdmissionTokenService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionTokenService").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code
mod tests {
    use super::*;
    use tessera_testing::MockClock;

    fn service() -> (AdmissionTokenService, Arc<MockClock>) {
        let clock = Arc::new(MockClock::at_test_epoch());
        let service = AdmissionTokenService::new(&TokenKeys::new([7; 32], [9; 32]), clock.clone());
        (service, clock)
    }

    #[test]
    fn round_trip_preserves_ticket_code() {
        let (service, _) = service();
        let code = TicketCode::from("TKT-ABCDEFGHJKMNPQRS");
        let issued = service.issue(&code, 30).unwrap();

        let verified = service.verify(&issued.wire_value).unwrap();
        assert_eq!(verified.payload.ticket_code, code);
        assert_eq!(verified.payload.token_id, issued.token_id);
        assert!(!verified.is_expired);
        assert!((verified.remaining_seconds - 30 * 60).abs() <= 1);
        assert!(issued.image_png.starts_with(&[0x89, b'P', b'N', b'G']));
    }

    #[test]
    fn expired_token_still_verifies() {
        let (service, clock) = service();
        let issued = service.issue(&TicketCode::from("TKT-1"), 5).unwrap();
        clock.advance(Duration::minutes(6));

        let verified = service.verify(&issued.wire_value).unwrap();
        assert!(verified.is_expired);
        assert_eq!(verified.remaining_seconds, -60);
    }

    #[test]
    fn any_flipped_character_breaks_the_signature() {
        let (service, _) = service();
        let wire = service.issue(&TicketCode::from("TKT-2"), 30).unwrap().wire_value;

        for (index, original) in wire.char_indices() {
            if original == ':' {
                continue;
            }
            let replacement = if original == 'A' { 'B' } else { 'A' };
            let mut tampered = wire.clone();
            tampered.replace_range(index..=index, &replacement.to_string());
            assert_eq!(
                service.verify(&tampered),
                Err(TokenError::SignatureInvalid),
                "position {index}"
            );
        }
    }

    #[test]
    fn other_keys_cannot_verify() {
        let (service, clock) = service();
        let other = AdmissionTokenService::new(&TokenKeys::new([7; 32], [8; 32]), clock);
        let wire = service.issue(&TicketCode::from("TKT-3"), 30).unwrap().wire_value;
        assert_eq!(other.verify(&wire), Err(TokenError::SignatureInvalid));
    }

    #[test]
    fn validly_signed_garbage_fails_decryption() {
        let (service, _) = service();
        let body = "not:a:token";
        let signature = URL_SAFE_NO_PAD.encode(service.sign(body).unwrap());
        let wire = format!("{body}:{signature}");
        assert_eq!(service.verify(&wire), Err(TokenError::DecryptionFailed));
    }

    #[test]
    fn empty_and_oversized_inputs_are_malformed() {
        let (service, _) = service();
        assert_eq!(service.verify(""), Err(TokenError::Malformed));
        assert_eq!(
            service.verify(&"A".repeat(MAX_WIRE_LEN + 1)),
            Err(TokenError::Malformed)
        );
        assert_eq!(service.verify("no-signature"), Err(TokenError::SignatureInvalid));
    }

    #[test]
    fn wrong_key_length_is_a_configuration_error() {
        let config = TokenConfig {
            encryption_key: Some(STANDARD.encode([1u8; 16])),
            signing_key: Some(STANDARD.encode([2u8; 32])),
            ..TokenConfig::default()
        };
        assert!(matches!(
            TokenKeys::from_config(&config),
            Err(TicketingError::Configuration(_))
        ));
    }

    #[test]
    fn missing_keys_fall_back_to_ephemeral() {
        assert!(TokenKeys::from_config(&TokenConfig::default()).is_ok());
    }
}
