//! Subscription and ack-mode bookkeeping shared by the client and server
//! engines.

use crate::error::StompError;
use crate::version::StompVersion;

/// How a subscriber wants message delivery acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// The server assumes delivery; no ACK/NACK is expected.
    Auto,
    /// Cumulative ack up to a given id.
    Client,
    /// Per-message ack (STOMP 1.1+ only).
    ClientIndividual,
}

impl AckMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AckMode::Auto => "auto",
            AckMode::Client => "client",
            AckMode::ClientIndividual => "client-individual",
        }
    }

    /// Parses a wire `ack` header value against the per-version allowed set:
    /// 1.0 allows `auto`/`client`; 1.1/1.2 also allow `client-individual`.
    pub fn parse(value: &str, version: StompVersion) -> Result<AckMode, StompError> {
        match (value, version) {
            ("auto", _) => Ok(AckMode::Auto),
            ("client", _) => Ok(AckMode::Client),
            ("client-individual", StompVersion::V1_1 | StompVersion::V1_2) => {
                Ok(AckMode::ClientIndividual)
            }
            (other, _) => Err(StompError::protocol(format!("Invalid ack mode: {other}"))),
        }
    }
}

/// A subscription record, keyed by destination on both the client and the
/// server. Created by SUBSCRIBE, destroyed by UNSUBSCRIBE (or
/// session teardown).
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: String,
    pub ack: AckMode,
}
