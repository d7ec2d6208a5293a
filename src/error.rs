use crate::models::Source;

/// Error taxonomy for the resolution core. Provider-internal plumbing keeps
/// using `anyhow`; anything that crosses the facade boundary is mapped to
/// one of these kinds so callers can tell a local contract violation from a
/// remote fault.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The target provider does not implement the requested operation.
    /// Never retried: this is a caller bug, not a transient condition.
    /// The field is `provider`, not `source`, because thiserror reserves
    /// `source` for error-chain causes.
    #[error("provider '{provider}' does not support {operation}")]
    CapabilityUnsupported {
        provider: Source,
        operation: &'static str,
    },

    /// Partner-phase login failure (device credentials rejected or the
    /// server response was unusable).
    #[error("partner login failed: {0}")]
    PartnerAuth(String),

    /// User-phase login failure (bad user credentials, expired partner
    /// token). No partial session is retained.
    #[error("user login failed: {0}")]
    UserAuth(String),

    /// Cipher-layer fault while encrypting an outgoing body.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Cipher-layer fault while decrypting a response.
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// Provider kept answering with rate-limit responses until the retry
    /// budget ran out.
    #[error("rate limit retries exhausted after {attempts} attempts for '{provider}'")]
    RateLimitExhausted { provider: Source, attempts: u32 },

    /// No playable URL could be obtained for a track.
    #[error("no stream URL for {0}: {1}")]
    StreamResolution(String, String),

    /// Malformed opaque composite id.
    #[error("bad composite id: {0}")]
    CompositeIdParse(String),

    /// Anything else a provider surfaced that the facade cannot classify.
    #[error(transparent)]
    Provider(#[from] anyhow::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn capability_error_names_the_provider() {
        let e = CoreError::CapabilityUnsupported {
            provider: Source::Deezer,
            operation: "get_stream_url",
        };
        let msg = e.to_string();
        assert!(msg.contains("deezer") && msg.contains("get_stream_url"));
        // The provider tag is data, not an error cause.
        assert!(e.source().is_none());
    }

    #[test]
    fn rate_limit_error_reports_attempts() {
        let e = CoreError::RateLimitExhausted {
            provider: Source::Itunes,
            attempts: 4,
        };
        assert!(e.to_string().contains("4 attempts"));
        assert!(e.source().is_none());
    }

    #[test]
    fn provider_errors_keep_their_cause_chain() {
        let inner = anyhow::anyhow!("upstream hiccup");
        let e = CoreError::Provider(inner);
        assert!(e.to_string().contains("upstream hiccup"));
    }
}
