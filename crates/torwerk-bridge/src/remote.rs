// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Remote challenge listeners — shell-side challenge handling over the
// bridge.
//
// The shell registers a listener for a realm; a `RemoteChallengeHandler`
// standing in for it joins the engine's challenge registry. When
// resolution reaches that handler, it emits a `ChallengeEvent` on the
// bridge's event channel and blocks (bounded) until the shell submits an
// answer for the realm. One pending answer slot exists per realm; a
// second concurrent challenge for the same realm is declined.

use std::collections::HashMap;
use std::sync::mpsc::{RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use torwerk_auth::registry::{ChallengeHandler, ChallengeOutcome, HandlerError};
use torwerk_core::types::{
    AttributeValue, AuthorizationHeader, ChallengeContext, Identity, IdentityClaims, IdentityKind,
};
use tracing::{debug, warn};

/// A challenge forwarded to the application shell for resolution.
#[derive(Debug, Clone)]
pub struct ChallengeEvent {
    pub realm: String,
    pub context: ChallengeContext,
}

/// Per-realm slots for answers the shell has yet to submit.
type PendingAnswers = Arc<Mutex<HashMap<String, SyncSender<Value>>>>;

/// Shared listener state owned by the bridge.
#[derive(Clone)]
pub(crate) struct RemoteListeners {
    events: mpsc::Sender<ChallengeEvent>,
    pending: PendingAnswers,
}

impl RemoteListeners {
    pub(crate) fn new(events: mpsc::Sender<ChallengeEvent>) -> Self {
        Self {
            events,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Build the registry-side handler for a realm.
    pub(crate) fn handler(&self, realm: String, timeout: Duration) -> RemoteChallengeHandler {
        RemoteChallengeHandler {
            realm,
            events: self.events.clone(),
            pending: Arc::clone(&self.pending),
            timeout,
        }
    }

    /// Route a shell answer to the handler blocked on `realm`.
    ///
    /// Returns false when no challenge is pending for that realm.
    pub(crate) fn submit(&self, realm: &str, answer: Value) -> bool {
        let sender = self
            .pending
            .lock()
            .expect("pending answers lock poisoned")
            .remove(realm);
        match sender {
            Some(tx) => {
                // The handler may have timed out in the meantime; a dead
                // receiver is not the shell's problem.
                let _ = tx.send(answer);
                true
            }
            None => false,
        }
    }

    /// Abort any pending challenge for `realm` (listener unregistered).
    pub(crate) fn abort(&self, realm: &str) {
        // Dropping the sender wakes the blocked handler with a disconnect.
        self.pending
            .lock()
            .expect("pending answers lock poisoned")
            .remove(realm);
    }
}

/// Registry-side stand-in for a shell challenge listener.
pub struct RemoteChallengeHandler {
    realm: String,
    events: mpsc::Sender<ChallengeEvent>,
    pending: PendingAnswers,
    timeout: Duration,
}

impl ChallengeHandler for RemoteChallengeHandler {
    fn realm(&self) -> &str {
        &self.realm
    }

    fn attempt(&self, ctx: &ChallengeContext) -> Result<ChallengeOutcome, HandlerError> {
        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        {
            let mut pending = self.pending.lock().expect("pending answers lock poisoned");
            if pending.contains_key(&self.realm) {
                return Err(HandlerError::Declined(format!(
                    "challenge already pending for realm {}",
                    self.realm
                )));
            }
            pending.insert(self.realm.clone(), tx);
        }

        let event = ChallengeEvent {
            realm: self.realm.clone(),
            context: ctx.clone(),
        };

        // Runs on the blocking pool, so a blocking send is fine here.
        if self.events.blocking_send(event).is_err() {
            self.pending
                .lock()
                .expect("pending answers lock poisoned")
                .remove(&self.realm);
            return Err(HandlerError::Declined(
                "challenge event channel closed".to_string(),
            ));
        }

        debug!(realm = %self.realm, "challenge forwarded to shell");
        let result = rx.recv_timeout(self.timeout);

        self.pending
            .lock()
            .expect("pending answers lock poisoned")
            .remove(&self.realm);

        match result {
            Ok(answer) => parse_answer(answer),
            Err(RecvTimeoutError::Timeout) => Err(HandlerError::Failed(format!(
                "shell did not answer the {} challenge in time",
                self.realm
            ))),
            Err(RecvTimeoutError::Disconnected) => Err(HandlerError::Failed(format!(
                "listener for realm {} was unregistered mid-challenge",
                self.realm
            ))),
        }
    }
}

/// Parse a shell answer into a challenge outcome.
///
/// Success shape: `{"token": "...", "identities": {"user": {...}, ...}}`.
/// Failure shape: `{"error": "..."}`.
fn parse_answer(answer: Value) -> Result<ChallengeOutcome, HandlerError> {
    let Value::Object(map) = answer else {
        return Err(HandlerError::Failed(format!(
            "challenge answer must be an object, got {answer}"
        )));
    };

    if let Some(error) = map.get("error") {
        let detail = error.as_str().unwrap_or("challenge rejected by shell");
        return Err(HandlerError::Failed(detail.to_string()));
    }

    let token = map
        .get("token")
        .and_then(Value::as_str)
        .ok_or_else(|| HandlerError::Failed("challenge answer lacks a token".to_string()))?;

    let mut claims = IdentityClaims::default();
    if let Some(identities) = map.get("identities") {
        let Value::Object(identities) = identities else {
            return Err(HandlerError::Failed(
                "identities must be an object".to_string(),
            ));
        };
        claims.user = parse_identity(IdentityKind::User, identities.get("user"))?;
        claims.app = parse_identity(IdentityKind::App, identities.get("app"))?;
        claims.device = parse_identity(IdentityKind::Device, identities.get("device"))?;
    }

    Ok(ChallengeOutcome::new(AuthorizationHeader::new(token)).with_claims(claims))
}

fn parse_identity(
    kind: IdentityKind,
    value: Option<&Value>,
) -> Result<Option<Identity>, HandlerError> {
    let Some(value) = value else {
        return Ok(None);
    };
    let Value::Object(map) = value else {
        return Err(HandlerError::Failed(format!(
            "{} identity must be an object",
            kind.as_str()
        )));
    };

    let mut identity = Identity::new(kind);
    for (key, attr) in map {
        let attr = match attr {
            Value::String(s) => AttributeValue::Text(s.clone()),
            Value::Number(n) => AttributeValue::Number(n.clone()),
            _ => {
                warn!(kind = kind.as_str(), %key, "dropping non-scalar identity attribute");
                continue;
            }
        };
        identity.attributes.insert(key.clone(), attr);
    }
    Ok(Some(identity))
}
