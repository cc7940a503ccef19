// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Call and reply envelopes for the bridge boundary.
//
// A call is an action name plus positional JSON arguments — the lowest
// common denominator every shell transport can produce. Arguments are
// validated here, before dispatch; a malformed call never reaches the
// manager.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use torwerk_core::error::{Result, TorwerkError};
use uuid::Uuid;

/// Unique identifier for one bridge call, echoed in its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId(pub Uuid);

impl CallId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One inbound message call from the application shell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeCall {
    pub id: CallId,
    pub action: String,
    /// Positional arguments, as the shell transport delivers them.
    pub args: Vec<Value>,
}

impl BridgeCall {
    pub fn new(action: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            id: CallId::new(),
            action: action.into(),
            args,
        }
    }
}

/// Terminal status of a bridge call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyStatus {
    Ok,
    Error,
}

/// The single terminal reply to a bridge call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeReply {
    pub id: CallId,
    pub status: ReplyStatus,
    pub message: Value,
}

impl BridgeReply {
    pub fn ok(id: CallId, message: impl Into<Value>) -> Self {
        Self {
            id,
            status: ReplyStatus::Ok,
            message: message.into(),
        }
    }

    /// Success with no payload — the empty ack.
    pub fn ok_empty(id: CallId) -> Self {
        Self::ok(id, Value::String(String::new()))
    }

    pub fn error(id: CallId, detail: impl Into<String>) -> Self {
        Self {
            id,
            status: ReplyStatus::Error,
            message: Value::String(detail.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ReplyStatus::Ok
    }
}

// ---------------------------------------------------------------------------
// Argument extraction
// ---------------------------------------------------------------------------

/// Extract a required string argument.
pub(crate) fn str_arg(call: &BridgeCall, index: usize, name: &str) -> Result<String> {
    match call.args.get(index) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(TorwerkError::InvalidArgument(format!(
            "{name}: expected string, got {other}"
        ))),
        None => Err(TorwerkError::InvalidArgument(format!("{name}: missing"))),
    }
}

/// Extract a required HTTP status code. Accepts a JSON number or a numeric
/// string, as shell transports differ on which they send.
pub(crate) fn status_arg(call: &BridgeCall, index: usize, name: &str) -> Result<u16> {
    let value = call
        .args
        .get(index)
        .ok_or_else(|| TorwerkError::InvalidArgument(format!("{name}: missing")))?;

    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };

    parsed
        .and_then(|n| u16::try_from(n).ok())
        .ok_or_else(|| {
            TorwerkError::InvalidArgument(format!("{name}: expected status code, got {value}"))
        })
}

/// Extract a required JSON object argument.
pub(crate) fn object_arg<'a>(
    call: &'a BridgeCall,
    index: usize,
    name: &str,
) -> Result<&'a serde_json::Map<String, Value>> {
    match call.args.get(index) {
        Some(Value::Object(map)) => Ok(map),
        Some(other) => Err(TorwerkError::InvalidArgument(format!(
            "{name}: expected object, got {other}"
        ))),
        None => Err(TorwerkError::InvalidArgument(format!("{name}: missing"))),
    }
}
