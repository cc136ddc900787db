//! Webhook signature verification
//!
//! Inbound events carry an HMAC-SHA256 signature over the raw request body,
//! computed with a per-source shared secret. Verification runs on the raw
//! bytes before any JSON parsing, and digest comparison is constant-time.

use std::collections::HashMap;

use hmac::{Hmac, KeyInit, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::config::{WebhookConfig, WebhookSourceConfig};
use crate::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Verifies inbound webhook signatures against per-source secrets
pub struct WebhookVerifier {
    /// Known sources and their secrets/header names
    sources: HashMap<String, WebhookSourceConfig>,
    /// Reject events from sources without a configured secret
    require_signature: bool,
}

impl WebhookVerifier {
    /// Create a verifier from the webhook configuration
    #[must_use]
    pub fn new(config: &WebhookConfig) -> Self {
        Self {
            sources: config.sources.clone(),
            require_signature: config.require_signature,
        }
    }

    /// Configuration for `source`, if known
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownWebhookSource`] for unregistered sources.
    pub fn source(&self, source: &str) -> Result<&WebhookSourceConfig> {
        self.sources
            .get(source)
            .ok_or_else(|| Error::UnknownWebhookSource(source.to_string()))
    }

    /// Verify the signature of one inbound event.
    ///
    /// `signature_header` is the raw header value (`sha256=<hex>` or bare
    /// hex). Rejections are terminal: the event is dropped, never retried.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownWebhookSource`] for unregistered sources and
    /// [`Error::SignatureVerification`] when the header is missing,
    /// malformed, or does not match the recomputed digest.
    pub fn verify(
        &self,
        source: &str,
        raw_body: &[u8],
        signature_header: Option<&str>,
    ) -> Result<()> {
        let source_config = self.source(source)?;

        let Some(secret) = source_config.resolve_secret() else {
            if self.require_signature {
                warn!(source, "Rejecting webhook: no secret configured");
                return Err(Error::SignatureVerification(format!(
                    "no secret configured for source '{source}'"
                )));
            }
            return Ok(());
        };

        let header_value = signature_header.ok_or_else(|| {
            Error::SignatureVerification(format!(
                "missing {} header",
                source_config.signature_header
            ))
        })?;

        // Accept "sha256=<hex>" (GitHub style) or bare hex
        let hex_digest = header_value
            .strip_prefix("sha256=")
            .unwrap_or(header_value);

        let expected = hex::decode(hex_digest)
            .map_err(|_| Error::SignatureVerification("malformed signature hex".to_string()))?;

        let computed = compute_signature(&secret, raw_body);

        // Constant-time comparison; ct_eq on unequal lengths is already false
        // without inspecting content, and a wrong-length digest is malformed
        // anyway.
        if computed.ct_eq(&expected).unwrap_u8() == 1 {
            Ok(())
        } else {
            Err(Error::SignatureVerification("signature mismatch".to_string()))
        }
    }
}

/// Compute the HMAC-SHA256 digest of `body` under `secret`
fn compute_signature(secret: &str, body: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(body);
    mac.finalize().into_bytes().to_vec()
}

/// Produce the `sha256=<hex>` header value for `body` under `secret`.
///
/// Used by outbound test fixtures and documentation examples.
#[must_use]
pub fn sign(secret: &str, body: &[u8]) -> String {
    format!("sha256={}", hex::encode(compute_signature(secret, body)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WebhookSourceConfig;

    fn verifier_with_secret(secret: &str) -> WebhookVerifier {
        let mut sources = HashMap::new();
        sources.insert(
            "media-server".to_string(),
            WebhookSourceConfig {
                secret: secret.to_string(),
                signature_header: "X-Signature".to_string(),
            },
        );
        WebhookVerifier {
            sources,
            require_signature: true,
        }
    }

    #[test]
    fn test_valid_signature_accepted() {
        let verifier = verifier_with_secret("topsecret");
        let body = br#"{"event":"library.new","title":"Heat"}"#;
        let header = sign("topsecret", body);

        assert!(verifier.verify("media-server", body, Some(header.as_str())).is_ok());
    }

    #[test]
    fn test_bare_hex_signature_accepted() {
        let verifier = verifier_with_secret("topsecret");
        let body = b"payload";
        let header = sign("topsecret", body);
        let bare = header.strip_prefix("sha256=").unwrap();

        assert!(verifier.verify("media-server", body, Some(bare)).is_ok());
    }

    #[test]
    fn test_tampered_body_rejected() {
        let verifier = verifier_with_secret("topsecret");
        let header = sign("topsecret", br#"{"event":"download.complete"}"#);

        let err = verifier
            .verify("media-server", br#"{"event":"download.failed"}"#, Some(header.as_str()))
            .unwrap_err();
        assert!(matches!(err, Error::SignatureVerification(_)));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let verifier = verifier_with_secret("topsecret");
        let body = b"payload";
        let header = sign("wrongsecret", body);

        assert!(verifier.verify("media-server", body, Some(header.as_str())).is_err());
    }

    #[test]
    fn test_missing_header_rejected() {
        let verifier = verifier_with_secret("topsecret");
        let err = verifier.verify("media-server", b"payload", None).unwrap_err();
        assert!(matches!(err, Error::SignatureVerification(_)));
    }

    #[test]
    fn test_malformed_hex_rejected() {
        let verifier = verifier_with_secret("topsecret");
        let err = verifier
            .verify("media-server", b"payload", Some("sha256=not-hex!"))
            .unwrap_err();
        assert!(matches!(err, Error::SignatureVerification(_)));
    }

    #[test]
    fn test_unknown_source_rejected() {
        let verifier = verifier_with_secret("topsecret");
        let err = verifier.verify("imaginary", b"payload", Some("sha256=00")).unwrap_err();
        assert!(matches!(err, Error::UnknownWebhookSource(_)));
    }

    #[test]
    fn test_unsigned_source_allowed_when_not_required() {
        let mut sources = HashMap::new();
        sources.insert("uptime-monitor".to_string(), WebhookSourceConfig::default());
        let verifier = WebhookVerifier {
            sources,
            require_signature: false,
        };

        assert!(verifier.verify("uptime-monitor", b"payload", None).is_ok());
    }

    #[test]
    fn test_unsigned_source_rejected_when_required() {
        let mut sources = HashMap::new();
        sources.insert("uptime-monitor".to_string(), WebhookSourceConfig::default());
        let verifier = WebhookVerifier {
            sources,
            require_signature: true,
        };

        assert!(verifier.verify("uptime-monitor", b"payload", None).is_err());
    }
}
