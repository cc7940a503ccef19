// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Challenge registry — ordered mapping from realm (challenge-type
// identifier) to the handler capable of satisfying that challenge.

use std::sync::Arc;

use thiserror::Error;
use torwerk_core::types::{AuthorizationHeader, ChallengeContext, IdentityClaims};
use tracing::debug;

/// What a handler reports when it cannot produce a header.
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    /// This handler cannot satisfy this particular challenge — resolution
    /// moves on to the next registered handler.
    #[error("handler declined: {0}")]
    Declined(String),

    /// Unrecoverable failure (bad credentials, server rejection). Aborts
    /// the whole resolution attempt.
    #[error("{0}")]
    Failed(String),
}

/// A successfully resolved challenge: the new header plus whatever identity
/// claims the exchange established.
#[derive(Debug, Clone)]
pub struct ChallengeOutcome {
    pub header: AuthorizationHeader,
    pub claims: IdentityClaims,
}

impl ChallengeOutcome {
    pub fn new(header: AuthorizationHeader) -> Self {
        Self {
            header,
            claims: IdentityClaims::default(),
        }
    }

    pub fn with_claims(mut self, claims: IdentityClaims) -> Self {
        self.claims = claims;
        self
    }
}

/// A pluggable component capable of resolving one challenge type.
///
/// Handlers are synchronous and run on the blocking pool; a handler that
/// talks to a server blocks its thread for the duration (bounded by the
/// manager's handler timeout).
pub trait ChallengeHandler: Send + Sync {
    /// The realm (challenge-type identifier) this handler serves.
    fn realm(&self) -> &str;

    /// Attempt to satisfy the challenge described by `ctx`.
    fn attempt(&self, ctx: &ChallengeContext) -> Result<ChallengeOutcome, HandlerError>;
}

/// Ordered registry of challenge handlers.
///
/// Registration order defines resolution precedence when the challenge
/// context does not disambiguate. Re-registering a realm replaces the
/// handler in place, keeping its position.
#[derive(Default)]
pub struct ChallengeRegistry {
    handlers: Vec<Arc<dyn ChallengeHandler>>,
}

impl ChallengeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Replaces any existing handler for the same
    /// realm without changing its precedence position.
    pub fn register(&mut self, handler: Arc<dyn ChallengeHandler>) {
        let realm = handler.realm().to_string();
        match self.handlers.iter().position(|h| h.realm() == realm) {
            Some(index) => {
                debug!(%realm, "replacing challenge handler");
                self.handlers[index] = handler;
            }
            None => {
                debug!(%realm, "registering challenge handler");
                self.handlers.push(handler);
            }
        }
    }

    /// Remove the handler for `realm`, if any. Returns whether one was
    /// removed.
    pub fn unregister(&mut self, realm: &str) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|h| h.realm() != realm);
        before != self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Handlers eligible for the given context, in precedence order.
    ///
    /// A challenge response that names registered realms narrows the set to
    /// those handlers; an initial acquisition (or a response naming none of
    /// them) falls back to every handler in registration order.
    pub fn matching(&self, ctx: &ChallengeContext) -> Vec<Arc<dyn ChallengeHandler>> {
        if !ctx.is_initial() {
            let named: Vec<_> = self
                .handlers
                .iter()
                .filter(|h| ctx.response_header.contains(h.realm()))
                .cloned()
                .collect();
            if !named.is_empty() {
                return named;
            }
        }
        self.handlers.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use torwerk_core::types::AuthorizationHeader;

    struct FixedHandler {
        realm: String,
        token: String,
    }

    impl ChallengeHandler for FixedHandler {
        fn realm(&self) -> &str {
            &self.realm
        }

        fn attempt(&self, _ctx: &ChallengeContext) -> Result<ChallengeOutcome, HandlerError> {
            Ok(ChallengeOutcome::new(AuthorizationHeader::new(&self.token)))
        }
    }

    fn fixed(realm: &str, token: &str) -> Arc<dyn ChallengeHandler> {
        Arc::new(FixedHandler {
            realm: realm.to_string(),
            token: token.to_string(),
        })
    }

    #[test]
    fn registration_order_is_precedence() {
        let mut registry = ChallengeRegistry::new();
        registry.register(fixed("first", "a"));
        registry.register(fixed("second", "b"));

        let handlers = registry.matching(&ChallengeContext::initial());
        assert_eq!(handlers.len(), 2);
        assert_eq!(handlers[0].realm(), "first");
        assert_eq!(handlers[1].realm(), "second");
    }

    #[test]
    fn reregistering_keeps_position() {
        let mut registry = ChallengeRegistry::new();
        registry.register(fixed("first", "a"));
        registry.register(fixed("second", "b"));
        registry.register(fixed("first", "replaced"));

        assert_eq!(registry.len(), 2);
        let handlers = registry.matching(&ChallengeContext::initial());
        assert_eq!(handlers[0].realm(), "first");
        let outcome = handlers[0].attempt(&ChallengeContext::initial()).unwrap();
        assert_eq!(outcome.header.token, "replaced");
    }

    #[test]
    fn unregister_removes_by_realm() {
        let mut registry = ChallengeRegistry::new();
        registry.register(fixed("only", "a"));

        assert!(registry.unregister("only"));
        assert!(!registry.unregister("only"));
        assert!(registry.is_empty());
    }

    #[test]
    fn challenge_header_narrows_to_named_realm() {
        let mut registry = ChallengeRegistry::new();
        registry.register(fixed("corporate", "a"));
        registry.register(fixed("mobile", "b"));

        let ctx = ChallengeContext::new(401, "Bearer realm=\"mobile\"");
        let handlers = registry.matching(&ctx);
        assert_eq!(handlers.len(), 1);
        assert_eq!(handlers[0].realm(), "mobile");
    }

    #[test]
    fn unrecognized_realm_falls_back_to_all() {
        let mut registry = ChallengeRegistry::new();
        registry.register(fixed("corporate", "a"));
        registry.register(fixed("mobile", "b"));

        let ctx = ChallengeContext::new(401, "Bearer realm=\"partner\"");
        assert_eq!(registry.matching(&ctx).len(), 2);
    }
}
