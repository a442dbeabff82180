//! Unified error types for the vitalgate core library.
//!
//! Each module reports its own failures ([`TransportError`], [`DecodeError`],
//! [`BackendError`], [`ConfigError`], [`LifecycleError`]). [`GatewayError`]
//! wraps them for callers that handle everything in one place, such as a session
//! task or the status API.
//!
//! # Example
//!
//! ```rust
//! use vitalgate_core::error::{GatewayError, GatewayResult};
//!
//! fn require_session(found: bool, address: &str) -> GatewayResult<()> {
//!     if !found {
//!         return Err(GatewayError::SessionNotFound(address.to_string()));
//!     }
//!     Ok(())
//! }
//! ```

use thiserror::Error;

use crate::backend::BackendError;
use crate::codec::DecodeError;
use crate::config::ConfigError;
use crate::lifecycle::LifecycleError;
use crate::transport::TransportError;

/// The unified error type for gateway operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    // =========================================================================
    // DEVICE ERRORS
    // =========================================================================
    /// Bluetooth link failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A notification could not be decoded.
    #[error("Frame rejected: {0}")]
    Decode(#[from] DecodeError),

    /// A configuration handshake never got its acknowledgement.
    #[error("Handshake '{step}' not acknowledged after {attempts} attempts")]
    HandshakeExhausted {
        /// Handshake name.
        step: &'static str,
        /// Writes made.
        attempts: u32,
    },

    /// Every connection attempt failed.
    #[error("Failed to connect to device {address} after {attempts} attempts")]
    ConnectionFailed {
        /// Device address.
        address: String,
        /// Attempts made.
        attempts: u32,
    },

    /// The session was cancelled.
    #[error("Session cancelled")]
    Cancelled,

    /// No session is running for this address.
    #[error("No active session for device '{0}'")]
    SessionNotFound(String),

    // =========================================================================
    // BACKEND ERRORS
    // =========================================================================
    /// Upload to the backend failed.
    #[error(transparent)]
    Backend(#[from] BackendError),

    // =========================================================================
    // CONFIGURATION & I/O ERRORS
    // =========================================================================
    /// Configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    /// Returns `true` for Bluetooth and device-level failures.
    #[inline]
    #[must_use]
    pub const fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::HandshakeExhausted { .. } | Self::ConnectionFailed { .. }
        )
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Returns `true` for conditions that are part of normal operation.
    ///
    /// Partial frames and cancelled sessions happen all the time and are not
    /// worth more than a debug log.
    #[inline]
    #[must_use]
    pub const fn is_expected_state(&self) -> bool {
        match self {
            Self::Decode(e) => e.is_expected(),
            Self::Cancelled => true,
            _ => false,
        }
    }

    /// Returns `true` if a later attempt may succeed without intervention.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::Decode(_)
                | Self::HandshakeExhausted { .. }
                | Self::ConnectionFailed { .. }
                | Self::Backend(_)
        )
    }

    /// Returns an HTTP-appropriate status code for this error.
    #[inline]
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::SessionNotFound(_) => 404,
            Self::Decode(_) | Self::Config(_) => 422,
            Self::Backend(_) => 502,
            Self::Transport(_) | Self::HandshakeExhausted { .. } | Self::ConnectionFailed { .. } => {
                503
            }
            Self::Cancelled | Self::Io(_) => 500,
        }
    }

    /// Returns a machine-readable error code for API responses.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::Decode(_) => "DECODE_ERROR",
            Self::HandshakeExhausted { .. } => "HANDSHAKE_EXHAUSTED",
            Self::ConnectionFailed { .. } => "CONNECTION_FAILED",
            Self::Cancelled => "CANCELLED",
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Self::Backend(_) => "BACKEND_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Io(_) => "IO_ERROR",
        }
    }
}

impl From<LifecycleError> for GatewayError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::AttemptsExhausted { address, attempts } => {
                Self::ConnectionFailed { address, attempts }
            }
            LifecycleError::Cancelled => Self::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Error as IoErr, ErrorKind};
    use std::path::PathBuf;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_transport_error_classification() {
        let err = GatewayError::from(TransportError::Disconnected);
        assert!(err.is_transport_error());
        assert!(err.is_recoverable());
        assert!(!err.is_config_error());

        let err = GatewayError::HandshakeExhausted {
            step: "enable-sensors",
            attempts: 10,
        };
        assert!(err.is_transport_error());
    }

    #[test]
    fn test_config_error_classification() {
        let err = GatewayError::from(ConfigError::NotFound(PathBuf::from("/etc/x.toml")));
        assert!(err.is_config_error());
        assert!(!err.is_recoverable());
        assert_eq!(err.error_code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_expected_state() {
        assert!(GatewayError::from(DecodeError::Incomplete { len: 20 }).is_expected_state());
        assert!(GatewayError::Cancelled.is_expected_state());
        assert!(!GatewayError::from(DecodeError::ChecksumMismatch {
            computed: "AAAA".into(),
            received: "BBBB".into(),
        })
        .is_expected_state());
    }

    #[test]
    fn test_lifecycle_conversion() {
        let err = GatewayError::from(LifecycleError::AttemptsExhausted {
            address: "AA:BB:CC:DD:EE:FF".into(),
            attempts: 3,
        });
        assert!(matches!(err, GatewayError::ConnectionFailed { attempts: 3, .. }));
        assert_eq!(
            err.to_string(),
            "Failed to connect to device AA:BB:CC:DD:EE:FF after 3 attempts"
        );
        assert!(matches!(
            GatewayError::from(LifecycleError::Cancelled),
            GatewayError::Cancelled
        ));
    }

    #[test]
    fn test_http_status_codes() {
        assert_eq!(GatewayError::SessionNotFound("x".into()).http_status_code(), 404);
        assert_eq!(
            GatewayError::from(TransportError::Timeout(Duration::from_secs(1))).http_status_code(),
            503
        );
        assert_eq!(
            GatewayError::from(IoErr::new(ErrorKind::Other, "disk")).http_status_code(),
            500
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            GatewayError::SessionNotFound("x".into()).error_code(),
            "SESSION_NOT_FOUND"
        );
        assert_eq!(GatewayError::Cancelled.error_code(), "CANCELLED");
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<GatewayError>();
        assert_sync::<GatewayError>();
    }
}
