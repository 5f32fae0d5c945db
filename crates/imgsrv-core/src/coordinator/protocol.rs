//! Newline-delimited JSON messages between workers and the designated
//! coordinator process.

use serde::{Deserialize, Serialize};

use crate::cache::{DerivativeId, RequesterId};
use crate::error::{DeriveError, DeriveResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireCommand {
    // worker -> coordinator
    Acquire,
    Release,
    Abort,
    Withdraw,
    // coordinator -> worker
    Reserved,
    Queued,
    Released,
    Expired,
}

/// One line on the wire, e.g.
/// `{"cmd":"acquire","identity":"3f2a-9c1e...","requesterId":"6b1f..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    pub cmd: WireCommand,
    pub identity: DerivativeId,
    pub requester_id: RequesterId,
}

impl WireMessage {
    pub fn new(cmd: WireCommand, identity: DerivativeId, requester_id: RequesterId) -> Self {
        Self {
            cmd,
            identity,
            requester_id,
        }
    }

    /// Serialize as one line, including the trailing newline.
    pub fn encode(&self) -> DeriveResult<String> {
        let mut line = serde_json::to_string(self).map_err(|e| {
            DeriveError::CoordinatorUnavailable(format!("cannot encode message: {e}"))
        })?;
        line.push('\n');
        Ok(line)
    }

    pub fn decode(line: &str) -> DeriveResult<Self> {
        serde_json::from_str(line.trim()).map_err(|e| {
            DeriveError::CoordinatorUnavailable(format!("malformed message {line:?}: {e}"))
        })
    }

    pub(crate) fn key(&self) -> (DerivativeId, RequesterId) {
        (self.identity.clone(), self.requester_id)
    }
}
