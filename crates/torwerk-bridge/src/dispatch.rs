// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Action dispatch — the boundary surface the application shell calls.
//
// Payload conventions follow the shell transport's expectations:
// booleans travel as the strings "true"/"false", policies as their wire
// names, identities as stringified JSON objects, and absence as the empty
// string.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use torwerk_auth::AuthorizationManager;
use torwerk_core::types::{Identity, PersistencePolicy};
use tracing::{debug, instrument, warn};

use crate::call::{BridgeCall, BridgeReply, object_arg, status_arg, str_arg};
use crate::remote::{ChallengeEvent, RemoteListeners};

/// Error text for an unsupported policy string, verbatim what the shell
/// surfaces to the user.
const UNSUPPORTED_POLICY: &str = "The specified persistence policy is not supported.";

/// Buffered challenge events between engine and shell.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// The bridge — pure plumbing between the shell transport and the
/// authorization manager.
///
/// Cheaply cloneable; clones share the manager, the listener state, and
/// the challenge event channel.
#[derive(Clone)]
pub struct Bridge {
    manager: Arc<AuthorizationManager>,
    listeners: RemoteListeners,
    events: Arc<std::sync::Mutex<Option<mpsc::Receiver<ChallengeEvent>>>>,
}

impl Bridge {
    pub fn new(manager: Arc<AuthorizationManager>) -> Self {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            manager,
            listeners: RemoteListeners::new(tx),
            events: Arc::new(std::sync::Mutex::new(Some(rx))),
        }
    }

    /// Take the challenge event stream. The host shell consumes this once
    /// and forwards each event to the matching registered listener.
    pub fn take_challenge_events(&self) -> Option<mpsc::Receiver<ChallengeEvent>> {
        self.events.lock().expect("event channel lock poisoned").take()
    }

    /// Dispatch a call on a fresh task and hand back the receiver for its
    /// single terminal reply.
    pub fn spawn(&self, call: BridgeCall) -> oneshot::Receiver<BridgeReply> {
        let (tx, rx) = oneshot::channel();
        let bridge = self.clone();
        tokio::spawn(async move {
            let reply = bridge.dispatch(call).await;
            // A caller that dropped its receiver forfeits the reply.
            let _ = tx.send(reply);
        });
        rx
    }

    /// Dispatch one call and produce its single terminal reply.
    #[instrument(skip(self, call), fields(call_id = %call.id, action = %call.action))]
    pub async fn dispatch(&self, call: BridgeCall) -> BridgeReply {
        debug!("dispatching bridge call");
        match call.action.as_str() {
            "obtainAuthorizationHeader" => self.obtain_authorization_header(&call).await,
            "clearAuthorizationData" => {
                self.manager.clear_authorization_data().await;
                BridgeReply::ok_empty(call.id)
            }
            "isAuthorizationRequired" => self.is_authorization_required(&call),
            "getCachedAuthorizationHeader" => self.cached_authorization_header(&call),
            "getAuthorizationPersistencePolicy" => {
                BridgeReply::ok(call.id, self.manager.persistence_policy().as_str())
            }
            "setAuthorizationPersistencePolicy" => self.set_persistence_policy(&call).await,
            "getUserIdentity" => identity_reply(&call, self.manager.user_identity()),
            "getAppIdentity" => identity_reply(&call, self.manager.app_identity()),
            "getDeviceIdentity" => identity_reply(&call, self.manager.device_identity()),
            "initialize" => self.initialize(&call),
            "logout" => {
                self.manager.logout().await;
                BridgeReply::ok_empty(call.id)
            }
            "registerAuthenticationListener" => self.register_listener(&call),
            "unregisterAuthenticationListener" => self.unregister_listener(&call),
            "submitChallengeAnswer" => self.submit_challenge_answer(&call),
            other => {
                warn!(action = other, "unrecognized bridge action");
                BridgeReply::error(call.id, format!("unrecognized action: {other}"))
            }
        }
    }

    async fn obtain_authorization_header(&self, call: &BridgeCall) -> BridgeReply {
        match self.manager.obtain_authorization_header().await {
            Ok(header) => BridgeReply::ok(
                call.id,
                json!({
                    "header": header.token,
                    "issuedAt": header.issued_at.to_rfc3339(),
                }),
            ),
            Err(e) => BridgeReply::error(call.id, e.to_string()),
        }
    }

    fn is_authorization_required(&self, call: &BridgeCall) -> BridgeReply {
        let status = match status_arg(call, 0, "statusCode") {
            Ok(s) => s,
            Err(e) => return BridgeReply::error(call.id, e.to_string()),
        };
        let header = match str_arg(call, 1, "responseAuthorizationHeader") {
            Ok(h) => h,
            Err(e) => return BridgeReply::error(call.id, e.to_string()),
        };

        let answer = self.manager.is_authorization_required(status, &header);
        BridgeReply::ok(call.id, answer.to_string())
    }

    fn cached_authorization_header(&self, call: &BridgeCall) -> BridgeReply {
        match self.manager.cached_authorization_header() {
            Ok(header) => BridgeReply::ok(call.id, header.unwrap_or_default()),
            Err(e) => BridgeReply::error(call.id, e.to_string()),
        }
    }

    async fn set_persistence_policy(&self, call: &BridgeCall) -> BridgeReply {
        let raw = match str_arg(call, 0, "policy") {
            Ok(p) => p,
            Err(e) => return BridgeReply::error(call.id, e.to_string()),
        };

        // Case-insensitive string-to-enum translation happens here, at the
        // boundary; the manager only ever sees the closed enum.
        let policy = match raw.parse::<PersistencePolicy>() {
            Ok(p) => p,
            Err(_) => return BridgeReply::error(call.id, UNSUPPORTED_POLICY),
        };

        match self.manager.set_persistence_policy(policy).await {
            Ok(()) => BridgeReply::ok_empty(call.id),
            Err(e) => BridgeReply::error(call.id, e.to_string()),
        }
    }

    fn initialize(&self, call: &BridgeCall) -> BridgeReply {
        let route = match str_arg(call, 0, "backendRoute") {
            Ok(r) => r,
            Err(e) => return BridgeReply::error(call.id, e.to_string()),
        };
        let guid = match str_arg(call, 1, "backendGuid") {
            Ok(g) => g,
            Err(e) => return BridgeReply::error(call.id, e.to_string()),
        };

        self.manager.initialize(route, guid);
        BridgeReply::ok_empty(call.id)
    }

    fn register_listener(&self, call: &BridgeCall) -> BridgeReply {
        let realm = match str_arg(call, 0, "realm") {
            Ok(r) => r,
            Err(e) => return BridgeReply::error(call.id, e.to_string()),
        };

        let timeout = Duration::from_secs(self.manager.config().handler_timeout_secs);
        let handler = self.listeners.handler(realm, timeout);
        self.manager.register_challenge_handler(Arc::new(handler));
        BridgeReply::ok_empty(call.id)
    }

    fn unregister_listener(&self, call: &BridgeCall) -> BridgeReply {
        let realm = match str_arg(call, 0, "realm") {
            Ok(r) => r,
            Err(e) => return BridgeReply::error(call.id, e.to_string()),
        };

        self.manager.unregister_challenge_handler(&realm);
        self.listeners.abort(&realm);
        BridgeReply::ok_empty(call.id)
    }

    fn submit_challenge_answer(&self, call: &BridgeCall) -> BridgeReply {
        let realm = match str_arg(call, 0, "realm") {
            Ok(r) => r,
            Err(e) => return BridgeReply::error(call.id, e.to_string()),
        };
        let answer = match object_arg(call, 1, "answer") {
            Ok(a) => Value::Object(a.clone()),
            Err(e) => return BridgeReply::error(call.id, e.to_string()),
        };

        if self.listeners.submit(&realm, answer) {
            BridgeReply::ok_empty(call.id)
        } else {
            BridgeReply::error(call.id, format!("no pending challenge for realm {realm}"))
        }
    }
}

/// Serialize an identity read: the stringified record, or empty when the
/// record is absent.
fn identity_reply(call: &BridgeCall, identity: Option<Identity>) -> BridgeReply {
    match identity {
        Some(identity) => BridgeReply::ok(call.id, identity.to_string()),
        None => BridgeReply::ok_empty(call.id),
    }
}
