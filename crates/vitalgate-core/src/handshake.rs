//! Command/acknowledgement handshakes.
//!
//! Before the watch streams vitals it has to be configured with three
//! handshakes, always in this order:
//!
//! | step | command | ack |
//! |---|---|---|
//! | `enable-sensors` | `DA700700112131415161717B2D` | `DAF00100003B13` |
//! | `master-switch` | `DA0E060001010101010144BE` | `DA8E010000233B` |
//! | `set-interval` | `DA310600000000000164FD49` | `DAB10100002F2F` |
//!
//! Each one writes its command, waits for the acknowledgement, and writes
//! again if none arrived. A handshake that never gets its ack is reported as
//! [`HandshakeOutcome::Exhausted`]; the watch often works anyway, so callers
//! log it and carry on.
//!
//! The optional bind request is different: it is written once and the reply,
//! if any, is classified into a [`BindOutcome`].

use std::time::Duration;

use futures::StreamExt;
use tracing::{debug, info};

use crate::codec::{decode_hex, encode_hex};
use crate::config::HandshakeConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::transport::{Characteristics, Link, Subscription, TransportError, TransportResult};

/// Switches on heart rate, blood pressure and oxygen sensors.
pub const ENABLE_SENSORS_COMMAND: &str = "DA700700112131415161717B2D";
/// Acknowledges [`ENABLE_SENSORS_COMMAND`].
pub const ENABLE_SENSORS_ACK: &str = "DAF00100003B13";
/// Turns on continuous measurement.
pub const MASTER_SWITCH_COMMAND: &str = "DA0E060001010101010144BE";
/// Acknowledges [`MASTER_SWITCH_COMMAND`].
pub const MASTER_SWITCH_ACK: &str = "DA8E010000233B";
/// Sets the measurement interval.
pub const SET_INTERVAL_COMMAND: &str = "DA310600000000000164FD49";
/// Acknowledges [`SET_INTERVAL_COMMAND`].
pub const SET_INTERVAL_ACK: &str = "DAB10100002F2F";

/// Asks the watch to bind to this gateway.
pub const BIND_REQUEST: &str = "DA0101000009EF";

/// Result of a retried handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// The ack arrived after `attempts` writes.
    Acked {
        /// Writes made, including the acknowledged one.
        attempts: u32,
    },
    /// No ack after `attempts` writes.
    Exhausted {
        /// Writes made.
        attempts: u32,
    },
}

impl HandshakeOutcome {
    /// Writes made.
    #[must_use]
    pub const fn attempts(self) -> u32 {
        match self {
            Self::Acked { attempts } | Self::Exhausted { attempts } => attempts,
        }
    }

    /// Turn an exhausted handshake into an error.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::HandshakeExhausted`] if no ack was seen.
    pub fn ensure_acked(self, step: &'static str) -> GatewayResult<u32> {
        match self {
            Self::Acked { attempts } => Ok(attempts),
            Self::Exhausted { attempts } => Err(GatewayError::HandshakeExhausted { step, attempts }),
        }
    }
}

/// The watch's answer to a bind request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOutcome {
    /// The watch accepted the bind.
    Bound,
    /// The user declined on the watch.
    Rejected,
    /// The watch reported an error.
    BindFailed,
    /// The watch did not decide within the window.
    NoResponse,
}

impl BindOutcome {
    /// Classify a notification, or `None` if it is not a bind reply.
    #[must_use]
    pub fn classify(hex: &str) -> Option<Self> {
        match hex.to_ascii_uppercase().as_str() {
            "DA8102000001EF5C" => Some(Self::Bound),
            "DA81020000002E9C" => Some(Self::Rejected),
            "DA81010002A1EE" => Some(Self::BindFailed),
            "DA8102000000EF5C" => Some(Self::NoResponse),
            _ => None,
        }
    }
}

/// A command that is retried until the watch acknowledges it.
#[derive(Debug, Clone)]
pub struct Handshake {
    /// Step name for logs.
    pub name: &'static str,
    /// Command frame, hex.
    pub command: &'static str,
    /// Expected acknowledgement, hex.
    pub ack: &'static str,
    /// Writes before giving up.
    pub max_attempts: u32,
    /// Wait for the ack after each write.
    pub attempt_wait: Duration,
}

impl Handshake {
    fn with_policy(
        name: &'static str,
        command: &'static str,
        ack: &'static str,
        policy: &HandshakeConfig,
    ) -> Self {
        Self {
            name,
            command,
            ack,
            max_attempts: policy.max_attempts,
            attempt_wait: policy.attempt_wait(),
        }
    }

    /// The `enable-sensors` step.
    #[must_use]
    pub fn enable_sensors(policy: &HandshakeConfig) -> Self {
        Self::with_policy("enable-sensors", ENABLE_SENSORS_COMMAND, ENABLE_SENSORS_ACK, policy)
    }

    /// The `master-switch` step.
    #[must_use]
    pub fn master_switch(policy: &HandshakeConfig) -> Self {
        Self::with_policy("master-switch", MASTER_SWITCH_COMMAND, MASTER_SWITCH_ACK, policy)
    }

    /// The `set-interval` step.
    #[must_use]
    pub fn set_interval(policy: &HandshakeConfig) -> Self {
        Self::with_policy("set-interval", SET_INTERVAL_COMMAND, SET_INTERVAL_ACK, policy)
    }

    /// The configuration handshakes in the order the watch expects them.
    #[must_use]
    pub fn configuration_sequence(policy: &HandshakeConfig) -> [Self; 3] {
        [
            Self::enable_sensors(policy),
            Self::master_switch(policy),
            Self::set_interval(policy),
        ]
    }

    /// Write the command until the ack is seen or the attempts run out.
    ///
    /// The notification subscription is dropped on every return path.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if a write or the subscription fails, or if
    /// the link drops while waiting.
    pub async fn run<L: Link>(
        &self,
        link: &L,
        chars: Characteristics,
    ) -> TransportResult<HandshakeOutcome> {
        let command = command_bytes(self.command, chars)?;
        let mut notifications = link.subscribe(chars.notify).await?;

        for attempt in 1..=self.max_attempts {
            link.write(chars.write, &command).await?;
            debug!(step = self.name, attempt, "Handshake command sent");

            let acked = wait_for(&mut notifications, self.attempt_wait, |hex| {
                hex.eq_ignore_ascii_case(self.ack)
            })
            .await?;
            if acked.is_some() {
                info!(step = self.name, attempt, "Handshake acknowledged");
                return Ok(HandshakeOutcome::Acked { attempts: attempt });
            }
        }

        debug!(
            step = self.name,
            attempts = self.max_attempts,
            "Handshake attempts used up"
        );
        Ok(HandshakeOutcome::Exhausted {
            attempts: self.max_attempts,
        })
    }
}

/// Send the bind request once and classify the reply.
///
/// Unrelated notifications are ignored. If nothing conclusive arrives within
/// `window` the result is [`BindOutcome::NoResponse`].
///
/// # Errors
///
/// Returns a [`TransportError`] if the write or subscription fails, or the
/// link drops while waiting.
pub async fn bind<L: Link>(
    link: &L,
    chars: Characteristics,
    window: Duration,
) -> TransportResult<BindOutcome> {
    let command = command_bytes(BIND_REQUEST, chars)?;
    let mut notifications = link.subscribe(chars.notify).await?;
    link.write(chars.write, &command).await?;

    let outcome = wait_for(&mut notifications, window, |hex| {
        BindOutcome::classify(hex).is_some()
    })
    .await?
    .and_then(|hex| BindOutcome::classify(&hex))
    .unwrap_or(BindOutcome::NoResponse);

    info!(?outcome, "Bind request finished");
    Ok(outcome)
}

/// Wait up to `window` for a notification accepted by `matches`.
///
/// Returns the matching frame as hex, or `None` when the window runs out.
async fn wait_for(
    notifications: &mut Subscription,
    window: Duration,
    matches: impl Fn(&str) -> bool,
) -> TransportResult<Option<String>> {
    let deadline = tokio::time::Instant::now() + window;
    loop {
        match tokio::time::timeout_at(deadline, notifications.next()).await {
            Err(_) => return Ok(None),
            Ok(None) => return Err(TransportError::Disconnected),
            Ok(Some(bytes)) => {
                let hex = encode_hex(&bytes);
                if matches(&hex) {
                    return Ok(Some(hex));
                }
                debug!(frame = %hex, "Ignoring notification");
            }
        }
    }
}

pub(crate) fn command_bytes(hex: &str, chars: Characteristics) -> TransportResult<Vec<u8>> {
    decode_hex(hex).map_err(|e| TransportError::WriteFailed {
        characteristic: chars.write,
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use tokio::time::Instant;

    use super::*;
    use crate::mock::MockTransport;
    use crate::transport::Transport;

    async fn open(transport: &MockTransport) -> crate::mock::MockLink {
        transport.connect("C4:7C:8D:6A:1B:22").await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_at_first_ack() {
        let transport = MockTransport::new().reply_on_nth(
            ENABLE_SENSORS_COMMAND,
            4,
            &[ENABLE_SENSORS_ACK],
        );
        let link = open(&transport).await;
        let started = Instant::now();

        let outcome = Handshake::enable_sensors(&HandshakeConfig::default())
            .run(&link, Characteristics::default())
            .await
            .unwrap();

        assert_eq!(outcome, HandshakeOutcome::Acked { attempts: 4 });
        assert_eq!(transport.writes_of(ENABLE_SENSORS_COMMAND), 4);
        assert_eq!(started.elapsed(), Duration::from_secs(15));
        assert_eq!(transport.active_subscriptions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_without_ack() {
        let transport = MockTransport::new().reply(MASTER_SWITCH_COMMAND, &[ENABLE_SENSORS_ACK]);
        let link = open(&transport).await;
        let started = Instant::now();

        let outcome = Handshake::master_switch(&HandshakeConfig::default())
            .run(&link, Characteristics::default())
            .await
            .unwrap();

        assert_eq!(outcome, HandshakeOutcome::Exhausted { attempts: 10 });
        assert_eq!(transport.writes_of(MASTER_SWITCH_COMMAND), 10);
        assert_eq!(started.elapsed(), Duration::from_secs(50));
        assert_eq!(transport.active_subscriptions(), 0);
        assert!(matches!(
            outcome.ensure_acked("master-switch"),
            Err(GatewayError::HandshakeExhausted { attempts: 10, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_error_propagates() {
        let transport = MockTransport::new();
        let link = open(&transport).await;
        transport.fail_writes();

        let result = Handshake::set_interval(&HandshakeConfig::default())
            .run(&link, Characteristics::default())
            .await;

        assert!(matches!(result, Err(TransportError::WriteFailed { .. })));
        assert_eq!(transport.active_subscriptions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bind_outcomes() {
        for (reply, expected) in [
            ("DA8102000001EF5C", BindOutcome::Bound),
            ("DA81020000002E9C", BindOutcome::Rejected),
            ("DA81010002A1EE", BindOutcome::BindFailed),
            ("DA8102000000EF5C", BindOutcome::NoResponse),
        ] {
            let transport = MockTransport::new().reply(BIND_REQUEST, &["DAF00100003B13", reply]);
            let link = open(&transport).await;
            let outcome = bind(&link, Characteristics::default(), Duration::from_secs(10))
                .await
                .unwrap();
            assert_eq!(outcome, expected, "{reply}");
            assert_eq!(transport.writes_of(BIND_REQUEST), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_bind_window_expires() {
        let transport = MockTransport::new();
        let link = open(&transport).await;
        let started = Instant::now();

        let outcome = bind(&link, Characteristics::default(), Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(outcome, BindOutcome::NoResponse);
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[test]
    fn test_configuration_order() {
        let names: Vec<_> = Handshake::configuration_sequence(&HandshakeConfig::default())
            .iter()
            .map(|h| h.name)
            .collect();
        assert_eq!(names, ["enable-sensors", "master-switch", "set-interval"]);
    }
}
