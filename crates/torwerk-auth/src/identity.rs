// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Identity store — the process-lifetime user/app/device records derived
// from successful authorization exchanges.

use std::sync::RwLock;

use torwerk_core::types::{Identity, IdentityClaims};
use tracing::debug;

#[derive(Debug, Default)]
struct Records {
    user: Option<Identity>,
    app: Option<Identity>,
    device: Option<Identity>,
}

/// Holds the current identity records. Empty until the first successful
/// authorization exchange populates it; reset by `clear`.
///
/// Reads take the shared lock and never block one another.
#[derive(Debug, Default)]
pub struct IdentityStore {
    records: RwLock<Records>,
}

impl IdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply the identity claims from a successful handler outcome.
    ///
    /// Only the identities the claim set actually carries are replaced —
    /// a refresh that re-proves the user without restating the device
    /// leaves the device record in place.
    pub fn set_from_claims(&self, claims: &IdentityClaims) {
        let mut records = self.records.write().expect("identity lock poisoned");
        if let Some(user) = &claims.user {
            records.user = Some(user.clone());
        }
        if let Some(app) = &claims.app {
            records.app = Some(app.clone());
        }
        if let Some(device) = &claims.device {
            records.device = Some(device.clone());
        }
        debug!(
            has_user = records.user.is_some(),
            has_app = records.app.is_some(),
            has_device = records.device.is_some(),
            "identity records updated"
        );
    }

    /// Reset all three records to empty.
    pub fn clear(&self) {
        let mut records = self.records.write().expect("identity lock poisoned");
        *records = Records::default();
        debug!("identity records cleared");
    }

    pub fn user(&self) -> Option<Identity> {
        self.records.read().expect("identity lock poisoned").user.clone()
    }

    pub fn app(&self) -> Option<Identity> {
        self.records.read().expect("identity lock poisoned").app.clone()
    }

    pub fn device(&self) -> Option<Identity> {
        self.records.read().expect("identity lock poisoned").device.clone()
    }
}
