// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Authorization engine configuration.

use serde::{Deserialize, Serialize};

use crate::types::PersistencePolicy;

/// Static configuration for the authorization manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HTTP status codes treated as authorization challenges.
    pub challenge_statuses: Vec<u16>,
    /// Scheme prefix a response authorization header must start with to be
    /// recognized as a challenge (matched ASCII case-insensitively).
    pub challenge_scheme: String,
    /// Upper bound on a single challenge handler attempt, in seconds.
    pub handler_timeout_secs: u64,
    /// Persistence policy used until the stored flag or a caller overrides it.
    pub default_policy: PersistencePolicy,
    /// Enable the audit trail.
    pub audit_enabled: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            challenge_statuses: vec![401, 403],
            challenge_scheme: "Bearer".to_string(),
            handler_timeout_secs: 30,
            // Durable storage is opt-in — the volatile policy never leaks
            // a token to disk.
            default_policy: PersistencePolicy::Never,
            audit_enabled: true,
        }
    }
}
