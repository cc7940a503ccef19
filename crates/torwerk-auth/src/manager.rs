// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Authorization manager — orchestrates header acquisition, challenge
// detection, caching, and policy enforcement.
//
// One manager per process is a deployment convention, not a language-level
// singleton: the composition root constructs it and hands out references.
//
// Concurrency model: overlapping obtain calls coalesce into a single
// in-flight resolution attempt. The first caller becomes the leader and
// runs the challenge protocol; every concurrent caller subscribes to the
// leader's broadcast and receives the same terminal outcome. Mutations
// that touch the persistence store and identity store together (commit,
// clear, policy change) serialize on one mutation lock; reads take
// neither.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::sync::broadcast;
use torwerk_core::config::AuthConfig;
use torwerk_core::error::{Result, TorwerkError};
use torwerk_core::types::{
    AuthorizationHeader, BackendEndpoint, ChallengeContext, HeaderState, Identity,
    PersistencePolicy,
};
use tracing::{debug, error, info, instrument, warn};

use crate::audit::AuthAuditLog;
use crate::identity::IdentityStore;
use crate::registry::{ChallengeHandler, ChallengeOutcome, ChallengeRegistry, HandlerError};
use crate::seal::token_fingerprint;
use crate::store::PersistenceStore;

/// Subject label for audit entries that concern no specific token.
const SESSION_SUBJECT: &str = "session";

type Outcome = Result<AuthorizationHeader>;

/// The authorization engine core.
pub struct AuthorizationManager {
    config: AuthConfig,
    store: PersistenceStore,
    identities: IdentityStore,
    registry: RwLock<ChallengeRegistry>,
    audit: Option<Arc<Mutex<AuthAuditLog>>>,
    endpoint: Mutex<Option<BackendEndpoint>>,
    /// The challenge that should drive the next resolution attempt.
    pending_challenge: Mutex<Option<ChallengeContext>>,
    state: Mutex<HeaderState>,
    /// Broadcast slot for the in-flight resolution attempt, if any.
    flight: Mutex<Option<broadcast::Sender<Outcome>>>,
    /// Serializes commit/clear/policy-change against each other.
    mutation: tokio::sync::Mutex<()>,
}

impl AuthorizationManager {
    /// Construct the manager around an opened store.
    ///
    /// The audit log is shared (the host may query it independently); it
    /// is ignored entirely when the config disables auditing.
    pub fn new(
        config: AuthConfig,
        store: PersistenceStore,
        audit: Option<Arc<Mutex<AuthAuditLog>>>,
    ) -> Self {
        let audit = if config.audit_enabled { audit } else { None };

        // A header persisted by a previous session means we start Valid.
        let initial_state = match store.cached_header() {
            Ok(Some(_)) => HeaderState::Valid,
            _ => HeaderState::NoHeader,
        };

        Self {
            config,
            store,
            identities: IdentityStore::new(),
            registry: RwLock::new(ChallengeRegistry::new()),
            audit,
            endpoint: Mutex::new(None),
            pending_challenge: Mutex::new(None),
            state: Mutex::new(initial_state),
            flight: Mutex::new(None),
            mutation: tokio::sync::Mutex::new(()),
        }
    }

    // -- Challenge handlers --------------------------------------------------

    /// Register a challenge handler. Registration order defines resolution
    /// precedence.
    pub fn register_challenge_handler(&self, handler: Arc<dyn ChallengeHandler>) {
        self.registry
            .write()
            .expect("registry lock poisoned")
            .register(handler);
    }

    /// Remove the handler for `realm`. Returns whether one was registered.
    pub fn unregister_challenge_handler(&self, realm: &str) -> bool {
        self.registry
            .write()
            .expect("registry lock poisoned")
            .unregister(realm)
    }

    // -- Header lifecycle ----------------------------------------------------

    /// Obtain an authorization header: the cached one when present,
    /// otherwise the outcome of a (possibly coalesced) challenge
    /// resolution.
    #[instrument(skip(self))]
    pub async fn obtain_authorization_header(&self) -> Outcome {
        if let Some(header) = self.store.cached_header()? {
            debug!("returning cached authorization header");
            return Ok(header);
        }

        // Join an in-flight attempt, or claim leadership of a new one.
        let follower_rx = {
            let mut flight = self.flight.lock().expect("flight lock poisoned");
            match flight.as_ref() {
                Some(tx) => Some(tx.subscribe()),
                None => {
                    let (tx, _) = broadcast::channel(1);
                    *flight = Some(tx);
                    None
                }
            }
        };

        if let Some(mut rx) = follower_rx {
            debug!("joining in-flight resolution attempt");
            return match rx.recv().await {
                Ok(outcome) => outcome,
                Err(_) => Err(TorwerkError::HandlerFailed {
                    cause: "resolution attempt aborted".to_string(),
                }),
            };
        }

        *self.state.lock().expect("state lock poisoned") = HeaderState::Pending;
        let outcome = self.run_challenge_resolution().await;

        *self.state.lock().expect("state lock poisoned") = match &outcome {
            Ok(_) => HeaderState::Valid,
            Err(_) => HeaderState::Failed,
        };

        // Release the flight slot before fanning out, so a late arrival
        // after a failure starts a fresh attempt instead of receiving a
        // stale outcome.
        let tx = self
            .flight
            .lock()
            .expect("flight lock poisoned")
            .take();
        if let Some(tx) = tx {
            // No receivers just means nobody overlapped with us.
            let _ = tx.send(outcome.clone());
        }

        outcome
    }

    /// Run the ordered-handler challenge protocol. Leader-only.
    async fn run_challenge_resolution(&self) -> Outcome {
        // The winning leader of a lost race re-checks the cache: the
        // previous attempt may have committed between our cache miss and
        // our claim of the flight slot.
        if let Some(header) = self.store.cached_header()? {
            return Ok(header);
        }

        let ctx = self
            .pending_challenge
            .lock()
            .expect("challenge lock poisoned")
            .clone()
            .unwrap_or_else(ChallengeContext::initial);

        let handlers = self
            .registry
            .read()
            .expect("registry lock poisoned")
            .matching(&ctx);

        if handlers.is_empty() {
            warn!("no challenge handler registered");
            self.record_audit("denied", SESSION_SUBJECT, false, Some("no handler registered"));
            return Err(TorwerkError::NoHandlerAvailable);
        }

        let timeout = Duration::from_secs(self.config.handler_timeout_secs);
        let mut last_decline: Option<String> = None;

        for handler in handlers {
            let realm = handler.realm().to_string();
            let attempt_ctx = ctx.clone();
            let h = Arc::clone(&handler);

            // Handlers are synchronous; run each attempt on the blocking
            // pool under the configured timeout. A timed-out handler keeps
            // its thread until it returns, but the resolution abandons it.
            let attempt = tokio::task::spawn_blocking(move || h.attempt(&attempt_ctx));
            let result = match tokio::time::timeout(timeout, attempt).await {
                Err(_) => {
                    let cause = format!(
                        "handler for realm {realm} timed out after {}s",
                        self.config.handler_timeout_secs
                    );
                    warn!(%realm, "challenge handler timed out");
                    self.record_audit("denied", SESSION_SUBJECT, false, Some(&cause));
                    return Err(TorwerkError::HandlerFailed { cause });
                }
                Ok(Err(join_err)) => {
                    let cause = format!("handler for realm {realm} aborted: {join_err}");
                    error!(%realm, "challenge handler aborted");
                    self.record_audit("denied", SESSION_SUBJECT, false, Some(&cause));
                    return Err(TorwerkError::HandlerFailed { cause });
                }
                Ok(Ok(result)) => result,
            };

            match result {
                Ok(outcome) => {
                    debug!(%realm, "challenge resolved");
                    return self.commit_outcome(outcome).await;
                }
                Err(HandlerError::Declined(reason)) => {
                    debug!(%realm, %reason, "handler declined, trying next");
                    last_decline = Some(reason);
                }
                Err(HandlerError::Failed(cause)) => {
                    warn!(%realm, %cause, "handler failed");
                    self.record_audit("denied", SESSION_SUBJECT, false, Some(&cause));
                    return Err(TorwerkError::HandlerFailed { cause });
                }
            }
        }

        self.record_audit("denied", SESSION_SUBJECT, false, last_decline.as_deref());
        Err(TorwerkError::NoHandlerAvailable)
    }

    /// Persist a successful outcome: header per policy, identity records
    /// from claims, pending challenge consumed.
    async fn commit_outcome(&self, outcome: ChallengeOutcome) -> Outcome {
        let _guard = self.mutation.lock().await;

        // Fails closed: a header we cannot store per policy is a failed
        // acquisition, not a silently volatile one.
        self.store.store_header(&outcome.header)?;
        self.identities.set_from_claims(&outcome.claims);
        *self
            .pending_challenge
            .lock()
            .expect("challenge lock poisoned") = None;

        let fingerprint = token_fingerprint(&outcome.header.token);
        info!(subject = %fingerprint, "authorization header obtained");
        self.record_audit("grant", &fingerprint, true, None);

        Ok(outcome.header)
    }

    /// Clear all authorization data: cached header (memory and durable)
    /// and identity records. Idempotent; never fails the caller — storage
    /// errors are logged and the in-memory state is cleared regardless.
    #[instrument(skip(self))]
    pub async fn clear_authorization_data(&self) {
        self.clear_with_action("clear").await;
    }

    /// End the session: clears authorization data, recorded distinctly.
    #[instrument(skip(self))]
    pub async fn logout(&self) {
        self.clear_with_action("logout").await;
    }

    async fn clear_with_action(&self, action: &str) {
        let _guard = self.mutation.lock().await;

        if let Err(e) = self.store.clear() {
            error!(error = %e, "failed to purge durable authorization data");
        }
        self.identities.clear();
        *self
            .pending_challenge
            .lock()
            .expect("challenge lock poisoned") = None;
        *self.state.lock().expect("state lock poisoned") = HeaderState::NoHeader;

        info!(action, "authorization data cleared");
        self.record_audit(action, SESSION_SUBJECT, true, None);
    }

    /// Whether a response indicates an authorization challenge.
    ///
    /// Pure: no I/O, no state, safe to call concurrently and repeatedly.
    pub fn is_authorization_required(&self, status_code: u16, response_header: &str) -> bool {
        if !self.config.challenge_statuses.contains(&status_code) {
            return false;
        }
        let header = response_header.trim_start().as_bytes();
        let scheme = self.config.challenge_scheme.as_bytes();
        header.len() >= scheme.len() && header[..scheme.len()].eq_ignore_ascii_case(scheme)
    }

    /// Record the challenge that should drive the next resolution attempt.
    pub fn set_pending_challenge(&self, ctx: ChallengeContext) {
        *self
            .pending_challenge
            .lock()
            .expect("challenge lock poisoned") = Some(ctx);
    }

    /// The raw token string of the cached header, if any.
    pub fn cached_authorization_header(&self) -> Result<Option<String>> {
        Ok(self.store.cached_header()?.map(|h| h.token))
    }

    /// Current lifecycle state of the managed header.
    pub fn header_state(&self) -> HeaderState {
        *self.state.lock().expect("state lock poisoned")
    }

    // -- Persistence policy --------------------------------------------------

    pub fn persistence_policy(&self) -> PersistencePolicy {
        self.store.policy()
    }

    /// Change the persistence policy. Existing data is never migrated.
    pub async fn set_persistence_policy(&self, policy: PersistencePolicy) -> Result<()> {
        let _guard = self.mutation.lock().await;
        self.store.set_policy(policy)?;
        self.record_audit("policy_change", SESSION_SUBJECT, true, Some(policy.as_str()));
        Ok(())
    }

    // -- Identities ----------------------------------------------------------

    pub fn user_identity(&self) -> Option<Identity> {
        self.identities.user()
    }

    pub fn app_identity(&self) -> Option<Identity> {
        self.identities.app()
    }

    pub fn device_identity(&self) -> Option<Identity> {
        self.identities.device()
    }

    // -- Backend endpoint ----------------------------------------------------

    /// Record the authorization backend this process talks to. Called once
    /// at startup, before the first authorization attempt.
    pub fn initialize(&self, route: impl Into<String>, guid: impl Into<String>) {
        let endpoint = BackendEndpoint {
            route: route.into(),
            guid: guid.into(),
        };
        info!(route = %endpoint.route, "backend endpoint recorded");
        self.record_audit("initialize", SESSION_SUBJECT, true, Some(&endpoint.route));
        *self.endpoint.lock().expect("endpoint lock poisoned") = Some(endpoint);
    }

    pub fn backend_endpoint(&self) -> Option<BackendEndpoint> {
        self.endpoint.lock().expect("endpoint lock poisoned").clone()
    }

    // -- Config --------------------------------------------------------------

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    // -- Audit ---------------------------------------------------------------

    fn record_audit(&self, action: &str, subject: &str, success: bool, details: Option<&str>) {
        if let Some(audit) = &self.audit
            && let Ok(log) = audit.lock()
            && let Err(e) = log.record(action, subject, success, details)
        {
            error!(error = %e, "failed to record audit entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Handler that counts its invocations and returns a fixed token with
    /// identity claims.
    struct CountingHandler {
        realm: String,
        token: String,
        attempts: Arc<AtomicUsize>,
        delay: Duration,
    }

    impl ChallengeHandler for CountingHandler {
        fn realm(&self) -> &str {
            &self.realm
        }

        fn attempt(
            &self,
            _ctx: &ChallengeContext,
        ) -> std::result::Result<ChallengeOutcome, HandlerError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            let claims = torwerk_core::types::IdentityClaims {
                user: Some(
                    Identity::new(torwerk_core::types::IdentityKind::User).with("id", "user-1"),
                ),
                app: Some(
                    Identity::new(torwerk_core::types::IdentityKind::App)
                        .with("id", "app-1")
                        .with("version", 7i64),
                ),
                device: Some(
                    Identity::new(torwerk_core::types::IdentityKind::Device)
                        .with("model", "test-device"),
                ),
            };
            Ok(ChallengeOutcome::new(AuthorizationHeader::new(&self.token)).with_claims(claims))
        }
    }

    struct DecliningHandler(String);

    impl ChallengeHandler for DecliningHandler {
        fn realm(&self) -> &str {
            &self.0
        }

        fn attempt(
            &self,
            _ctx: &ChallengeContext,
        ) -> std::result::Result<ChallengeOutcome, HandlerError> {
            Err(HandlerError::Declined("not my challenge".to_string()))
        }
    }

    struct FailingHandler(String);

    impl ChallengeHandler for FailingHandler {
        fn realm(&self) -> &str {
            &self.0
        }

        fn attempt(
            &self,
            _ctx: &ChallengeContext,
        ) -> std::result::Result<ChallengeOutcome, HandlerError> {
            Err(HandlerError::Failed("credentials rejected".to_string()))
        }
    }

    fn make_manager(config: AuthConfig) -> AuthorizationManager {
        let store =
            PersistenceStore::open_in_memory(config.default_policy, None).expect("open store");
        AuthorizationManager::new(config, store, None)
    }

    fn counting_handler(
        realm: &str,
        token: &str,
        delay: Duration,
    ) -> (Arc<dyn ChallengeHandler>, Arc<AtomicUsize>) {
        let attempts = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(CountingHandler {
            realm: realm.to_string(),
            token: token.to_string(),
            attempts: Arc::clone(&attempts),
            delay,
        });
        (handler, attempts)
    }

    #[test]
    fn authorization_required_is_deterministic() {
        let manager = make_manager(AuthConfig::default());

        for _ in 0..3 {
            assert!(manager.is_authorization_required(401, "Bearer realm=\"mobile\""));
            assert!(manager.is_authorization_required(403, "bearer xyz"));
            assert!(!manager.is_authorization_required(200, "Bearer xyz"));
            assert!(!manager.is_authorization_required(401, "Basic xyz"));
            assert!(!manager.is_authorization_required(401, ""));
        }
    }

    #[tokio::test]
    async fn obtain_without_handlers_reports_none_available() {
        let manager = make_manager(AuthConfig::default());
        let err = manager.obtain_authorization_header().await.unwrap_err();
        assert_eq!(err, TorwerkError::NoHandlerAvailable);
        assert_eq!(manager.header_state(), HeaderState::Failed);
    }

    #[tokio::test]
    async fn obtain_uses_first_successful_handler() {
        let manager = make_manager(AuthConfig::default());
        manager.register_challenge_handler(Arc::new(DecliningHandler("first".to_string())));
        let (handler, attempts) = counting_handler("second", "Bearer xyz", Duration::ZERO);
        manager.register_challenge_handler(handler);

        let header = manager.obtain_authorization_header().await.unwrap();
        assert_eq!(header.token, "Bearer xyz");
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(manager.header_state(), HeaderState::Valid);
    }

    #[tokio::test]
    async fn all_handlers_declining_reports_none_available() {
        let manager = make_manager(AuthConfig::default());
        manager.register_challenge_handler(Arc::new(DecliningHandler("a".to_string())));
        manager.register_challenge_handler(Arc::new(DecliningHandler("b".to_string())));

        let err = manager.obtain_authorization_header().await.unwrap_err();
        assert_eq!(err, TorwerkError::NoHandlerAvailable);
    }

    #[tokio::test]
    async fn unrecoverable_handler_failure_aborts_resolution() {
        let manager = make_manager(AuthConfig::default());
        manager.register_challenge_handler(Arc::new(FailingHandler("first".to_string())));
        let (never_reached, attempts) = counting_handler("second", "Bearer x", Duration::ZERO);
        manager.register_challenge_handler(never_reached);

        let err = manager.obtain_authorization_header().await.unwrap_err();
        assert!(matches!(err, TorwerkError::HandlerFailed { .. }));
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cached_header_short_circuits_handlers() {
        let manager = make_manager(AuthConfig::default());
        let (handler, attempts) = counting_handler("realm", "Bearer cached", Duration::ZERO);
        manager.register_challenge_handler(handler);

        let first = manager.obtain_authorization_header().await.unwrap();
        let second = manager.obtain_authorization_header().await.unwrap();

        assert_eq!(first.token, second.token);
        assert_eq!(attempts.load(Ordering::SeqCst), 1, "second call must hit the cache");
    }

    #[tokio::test]
    async fn durable_cache_short_circuits_handlers() {
        let config = AuthConfig {
            default_policy: PersistencePolicy::Always,
            ..Default::default()
        };
        let manager = make_manager(config);
        let (handler, attempts) = counting_handler("realm", "Bearer durable", Duration::ZERO);
        manager.register_challenge_handler(handler);

        manager.obtain_authorization_header().await.unwrap();
        let cached = manager.cached_authorization_header().unwrap();

        assert_eq!(cached.as_deref(), Some("Bearer durable"));
        assert_eq!(attempts.load(Ordering::SeqCst), 1, "cache read must not invoke handlers");
    }

    #[tokio::test]
    async fn successful_obtain_populates_identities() {
        let manager = make_manager(AuthConfig::default());
        let (handler, _) = counting_handler("realm", "Bearer xyz", Duration::ZERO);
        manager.register_challenge_handler(handler);

        assert!(manager.user_identity().is_none());
        manager.obtain_authorization_header().await.unwrap();

        assert_eq!(
            manager.user_identity().unwrap().get("id"),
            Some(&"user-1".into())
        );
        assert_eq!(
            manager.app_identity().unwrap().get("version"),
            Some(&7i64.into())
        );
        assert!(manager.device_identity().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_obtains_coalesce_into_one_attempt() {
        let manager = Arc::new(make_manager(AuthConfig::default()));
        let (handler, attempts) =
            counting_handler("realm", "Bearer shared", Duration::from_millis(100));
        manager.register_challenge_handler(handler);

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let m = Arc::clone(&manager);
            tasks.push(tokio::spawn(
                async move { m.obtain_authorization_header().await },
            ));
        }

        for task in tasks {
            let header = task.await.unwrap().unwrap();
            assert_eq!(header.token, "Bearer shared");
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 1, "attempts must coalesce");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn coalesced_callers_share_a_failure() {
        let manager = Arc::new(make_manager(AuthConfig::default()));

        struct SlowFailure;
        impl ChallengeHandler for SlowFailure {
            fn realm(&self) -> &str {
                "slow"
            }
            fn attempt(
                &self,
                _ctx: &ChallengeContext,
            ) -> std::result::Result<ChallengeOutcome, HandlerError> {
                std::thread::sleep(Duration::from_millis(100));
                Err(HandlerError::Failed("server said no".to_string()))
            }
        }
        manager.register_challenge_handler(Arc::new(SlowFailure));

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let m = Arc::clone(&manager);
            tasks.push(tokio::spawn(
                async move { m.obtain_authorization_header().await },
            ));
        }

        for task in tasks {
            let err = task.await.unwrap().unwrap_err();
            assert!(matches!(err, TorwerkError::HandlerFailed { .. }));
        }
    }

    #[tokio::test]
    async fn handler_timeout_surfaces_as_failure() {
        let config = AuthConfig {
            handler_timeout_secs: 1,
            ..Default::default()
        };
        let manager = make_manager(config);
        let (handler, _) = counting_handler("slow", "Bearer late", Duration::from_secs(5));
        manager.register_challenge_handler(handler);

        let err = manager.obtain_authorization_header().await.unwrap_err();
        match err {
            TorwerkError::HandlerFailed { cause } => assert!(cause.contains("timed out")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn clear_is_idempotent() {
        let manager = make_manager(AuthConfig::default());
        let (handler, _) = counting_handler("realm", "Bearer xyz", Duration::ZERO);
        manager.register_challenge_handler(handler);
        manager.obtain_authorization_header().await.unwrap();

        manager.clear_authorization_data().await;
        manager.clear_authorization_data().await;

        assert!(manager.cached_authorization_header().unwrap().is_none());
        assert!(manager.user_identity().is_none());
        assert_eq!(manager.header_state(), HeaderState::NoHeader);
    }

    #[tokio::test]
    async fn pending_challenge_selects_named_realm() {
        let manager = make_manager(AuthConfig::default());
        let (corporate, corporate_attempts) =
            counting_handler("corporate", "Bearer corp", Duration::ZERO);
        let (mobile, _) = counting_handler("mobile", "Bearer mob", Duration::ZERO);
        manager.register_challenge_handler(corporate);
        manager.register_challenge_handler(mobile);

        manager.set_pending_challenge(ChallengeContext::new(401, "Bearer realm=\"mobile\""));
        let header = manager.obtain_authorization_header().await.unwrap();

        assert_eq!(header.token, "Bearer mob");
        assert_eq!(corporate_attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn policy_round_trip() {
        let manager = make_manager(AuthConfig::default());
        assert_eq!(manager.persistence_policy(), PersistencePolicy::Never);

        manager
            .set_persistence_policy(PersistencePolicy::Always)
            .await
            .unwrap();
        assert_eq!(manager.persistence_policy(), PersistencePolicy::Always);
    }

    #[tokio::test]
    async fn logout_clears_and_audits_distinctly() {
        let audit = Arc::new(Mutex::new(AuthAuditLog::open_in_memory().unwrap()));
        let store = PersistenceStore::open_in_memory(PersistencePolicy::Never, None).unwrap();
        let manager = AuthorizationManager::new(AuthConfig::default(), store, Some(Arc::clone(&audit)));

        let (handler, _) = counting_handler("realm", "Bearer xyz", Duration::ZERO);
        manager.register_challenge_handler(handler);
        manager.obtain_authorization_header().await.unwrap();
        manager.logout().await;

        assert!(manager.cached_authorization_header().unwrap().is_none());
        let log = audit.lock().unwrap();
        assert_eq!(log.entries_for_action("logout").unwrap().len(), 1);
        let grants = log.entries_for_action("grant").unwrap();
        assert_eq!(grants.len(), 1);
        // The audit subject is a fingerprint, never the raw token.
        assert_ne!(grants[0].subject, "Bearer xyz");
        assert_eq!(grants[0].subject, token_fingerprint("Bearer xyz"));
    }

    #[tokio::test]
    async fn initialize_records_endpoint() {
        let manager = make_manager(AuthConfig::default());
        assert!(manager.backend_endpoint().is_none());

        manager.initialize("https://auth.example.net", "app-guid-1");
        let endpoint = manager.backend_endpoint().unwrap();
        assert_eq!(endpoint.route, "https://auth.example.net");
        assert_eq!(endpoint.guid, "app-guid-1");
    }

    #[tokio::test]
    async fn failed_then_retried_resolution_recovers() {
        let manager = make_manager(AuthConfig::default());
        manager.register_challenge_handler(Arc::new(FailingHandler("flaky".to_string())));

        assert!(manager.obtain_authorization_header().await.is_err());
        assert_eq!(manager.header_state(), HeaderState::Failed);

        // Replace the handler and retry — Failed re-enters Pending.
        let (handler, _) = counting_handler("flaky", "Bearer ok", Duration::ZERO);
        manager.register_challenge_handler(handler);
        let header = manager.obtain_authorization_header().await.unwrap();
        assert_eq!(header.token, "Bearer ok");
        assert_eq!(manager.header_state(), HeaderState::Valid);
    }
}
