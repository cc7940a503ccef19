// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Torwerk authorization engine.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TorwerkError;

/// An authorization header obtained through challenge resolution.
///
/// Immutable once created — a refresh replaces the whole value rather than
/// mutating it in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationHeader {
    /// The opaque header value, e.g. `"Bearer eyJhb..."`.
    pub token: String,
    /// When the header was issued by the resolving handler.
    pub issued_at: DateTime<Utc>,
}

impl AuthorizationHeader {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            issued_at: Utc::now(),
        }
    }
}

/// Governs whether the authorization header survives beyond the current
/// in-memory session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PersistencePolicy {
    /// Header is written to durable storage and survives process restart.
    Always,
    /// Header lives only in process memory and is gone when the session ends.
    Never,
}

impl PersistencePolicy {
    /// Canonical wire form, as the boundary layer transmits it.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Always => "ALWAYS",
            Self::Never => "NEVER",
        }
    }
}

impl std::fmt::Display for PersistencePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PersistencePolicy {
    type Err = TorwerkError;

    /// Case-insensitive parse of the wire form. Used only at the boundary
    /// layer — internal code passes the enum around.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ALWAYS" => Ok(Self::Always),
            "NEVER" => Ok(Self::Never),
            other => Err(TorwerkError::InvalidPolicy(other.to_string())),
        }
    }
}

/// Which party an identity record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdentityKind {
    User,
    App,
    Device,
}

impl IdentityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::App => "app",
            Self::Device => "device",
        }
    }
}

/// A single identity attribute value — string or number, per the claim
/// formats the authorization server emits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Text(String),
    Number(serde_json::Number),
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<i64> for AttributeValue {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

/// An identity record (user, app, or device) established as a byproduct of
/// successful authorization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub kind: IdentityKind,
    /// Attribute map. Ordered so the serialized form is stable.
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl Identity {
    pub fn new(kind: IdentityKind) -> Self {
        Self {
            kind,
            attributes: BTreeMap::new(),
        }
    }

    /// Builder-style attribute insertion.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }
}

impl std::fmt::Display for Identity {
    /// The stringified record the boundary layer ships: the attribute map
    /// as a JSON object.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(&self.attributes) {
            Ok(json) => f.write_str(&json),
            Err(_) => f.write_str("{}"),
        }
    }
}

/// Identity records supplied by a successful challenge handler outcome.
/// Absent entries leave the corresponding store slot untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdentityClaims {
    pub user: Option<Identity>,
    pub app: Option<Identity>,
    pub device: Option<Identity>,
}

/// The server-driven signal that triggered (re)authorization: the HTTP
/// status code plus the response authorization header value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeContext {
    pub status_code: u16,
    pub response_header: String,
}

impl ChallengeContext {
    pub fn new(status_code: u16, response_header: impl Into<String>) -> Self {
        Self {
            status_code,
            response_header: response_header.into(),
        }
    }

    /// First-time acquisition — no triggering response exists yet.
    pub fn initial() -> Self {
        Self {
            status_code: 0,
            response_header: String::new(),
        }
    }

    /// Whether this context carries an actual server response (as opposed
    /// to an initial, unprompted acquisition).
    pub fn is_initial(&self) -> bool {
        self.status_code == 0 && self.response_header.is_empty()
    }
}

/// Lifecycle states of the managed authorization header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeaderState {
    /// No header cached and no resolution in flight.
    NoHeader,
    /// A challenge-resolution attempt is in flight.
    Pending,
    /// A header is cached and considered valid.
    Valid,
    /// The last resolution attempt failed; a retry re-enters Pending.
    Failed,
}

/// The authorization backend this process talks to, recorded once at
/// startup through the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendEndpoint {
    /// Base URL of the authorization server.
    pub route: String,
    /// GUID of the application as registered with the backend.
    pub guid: String,
}
