// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Persistence store — scoped storage for the cached authorization header
// and the persistence-policy flag.
//
// The durable half is a local SQLite database (the policy flag and, under
// ALWAYS, the header token — sealed when a TokenSealer is configured). The
// volatile half is a single in-memory slot used under NEVER. All reads and
// writes go through one mutex, so the policy flag and the header value can
// never be observed torn.
//
// Policy semantics:
//   ALWAYS — store_header writes the durable row; cached_header reads it.
//            Survives process restart.
//   NEVER  — store_header writes the memory slot; cached_header reads it.
//            Gone when the process ends.
// Switching to NEVER empties the memory slot, so a read under NEVER never
// returns a value written before the policy became NEVER. Durable rows are
// not migrated either way; stale ALWAYS-era rows persist until `clear`.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use torwerk_core::error::{Result, TorwerkError};
use torwerk_core::types::{AuthorizationHeader, PersistencePolicy};
use tracing::{debug, info, instrument, warn};

use crate::seal::TokenSealer;

const CREATE_TABLE_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS auth_store (
        key       TEXT PRIMARY KEY,
        value     BLOB NOT NULL,
        issued_at TEXT
    )
"#;

const HEADER_KEY: &str = "authorization_header";
const POLICY_KEY: &str = "persistence_policy";

/// Map a `rusqlite::Error` to the fail-closed storage error.
fn storage_err(e: rusqlite::Error) -> TorwerkError {
    TorwerkError::StorageUnavailable(e.to_string())
}

struct StoreInner {
    conn: Connection,
    sealer: Option<TokenSealer>,
    policy: PersistencePolicy,
    /// Volatile header slot, used only while the policy is NEVER.
    memory: Option<AuthorizationHeader>,
}

/// Process-lifetime store for the authorization header and policy flag.
///
/// All methods are synchronous because `rusqlite` does not support async
/// natively.  In an async context, wrap calls in `tokio::task::spawn_blocking`.
pub struct PersistenceStore {
    inner: Mutex<StoreInner>,
}

impl PersistenceStore {
    /// Open (or create) the store database at the given path.
    ///
    /// A policy flag persisted by a previous session wins over
    /// `default_policy`, so ALWAYS-era data stays reachable after restart.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(
        path: impl AsRef<Path>,
        default_policy: PersistencePolicy,
        sealer: Option<TokenSealer>,
    ) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(storage_err)?;

        // WAL mode is better for concurrent readers and survives unclean
        // shutdowns more gracefully.
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(storage_err)?;

        Self::from_connection(conn, default_policy, sealer)
    }

    /// Open a store backed by an in-memory database (useful for tests).
    pub fn open_in_memory(
        default_policy: PersistencePolicy,
        sealer: Option<TokenSealer>,
    ) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        Self::from_connection(conn, default_policy, sealer)
    }

    fn from_connection(
        conn: Connection,
        default_policy: PersistencePolicy,
        sealer: Option<TokenSealer>,
    ) -> Result<Self> {
        conn.execute_batch(CREATE_TABLE_SQL).map_err(storage_err)?;

        let policy = match Self::load_policy_flag(&conn)? {
            Some(stored) => stored,
            None => default_policy,
        };

        info!(policy = %policy, "persistence store opened");
        Ok(Self {
            inner: Mutex::new(StoreInner {
                conn,
                sealer,
                policy,
                memory: None,
            }),
        })
    }

    fn load_policy_flag(conn: &Connection) -> Result<Option<PersistencePolicy>> {
        let stored: Option<Vec<u8>> = conn
            .query_row(
                "SELECT value FROM auth_store WHERE key = ?1",
                params![POLICY_KEY],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?;

        match stored {
            None => Ok(None),
            Some(bytes) => {
                let text = String::from_utf8(bytes)
                    .map_err(|e| TorwerkError::StorageUnavailable(format!("policy flag: {e}")))?;
                match text.parse::<PersistencePolicy>() {
                    Ok(policy) => Ok(Some(policy)),
                    Err(_) => {
                        // A corrupt flag is not worth refusing to open over.
                        warn!(flag = %text, "ignoring unrecognized stored policy flag");
                        Ok(None)
                    }
                }
            }
        }
    }

    /// The currently active persistence policy.
    pub fn policy(&self) -> PersistencePolicy {
        self.inner.lock().expect("store lock poisoned").policy
    }

    /// Change the active policy.
    ///
    /// The flag is written durably first — if that fails the policy is left
    /// unchanged (fail closed). Already-stored data is never migrated.
    #[instrument(skip(self))]
    pub fn set_policy(&self, policy: PersistencePolicy) -> Result<()> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        if inner.policy == policy {
            return Ok(());
        }

        inner
            .conn
            .execute(
                "INSERT INTO auth_store (key, value, issued_at) VALUES (?1, ?2, NULL)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![POLICY_KEY, policy.as_str().as_bytes()],
            )
            .map_err(storage_err)?;

        inner.policy = policy;
        if policy == PersistencePolicy::Never {
            // Values written before the switch must not be observable
            // under NEVER.
            inner.memory = None;
        }

        info!(policy = %policy, "persistence policy changed");
        Ok(())
    }

    /// Store a freshly issued header according to the active policy.
    #[instrument(skip_all)]
    pub fn store_header(&self, header: &AuthorizationHeader) -> Result<()> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        match inner.policy {
            PersistencePolicy::Always => {
                let value = match &inner.sealer {
                    Some(sealer) => sealer.seal(header.token.as_bytes())?,
                    None => header.token.clone().into_bytes(),
                };
                inner
                    .conn
                    .execute(
                        "INSERT INTO auth_store (key, value, issued_at) VALUES (?1, ?2, ?3)
                         ON CONFLICT(key) DO UPDATE SET
                             value = excluded.value,
                             issued_at = excluded.issued_at",
                        params![HEADER_KEY, value, header.issued_at.to_rfc3339()],
                    )
                    .map_err(storage_err)?;
                debug!("header stored durably");
            }
            PersistencePolicy::Never => {
                inner.memory = Some(header.clone());
                debug!("header stored in memory");
            }
        }
        Ok(())
    }

    /// Read the cached header, if any, from wherever the active policy
    /// keeps it.
    pub fn cached_header(&self) -> Result<Option<AuthorizationHeader>> {
        let inner = self.inner.lock().expect("store lock poisoned");
        match inner.policy {
            PersistencePolicy::Never => Ok(inner.memory.clone()),
            PersistencePolicy::Always => {
                let row: Option<(Vec<u8>, Option<String>)> = inner
                    .conn
                    .query_row(
                        "SELECT value, issued_at FROM auth_store WHERE key = ?1",
                        params![HEADER_KEY],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()
                    .map_err(storage_err)?;

                let Some((value, issued_at)) = row else {
                    return Ok(None);
                };

                let token_bytes = match &inner.sealer {
                    Some(sealer) => sealer.unseal(&value)?,
                    None => value,
                };
                let token = String::from_utf8(token_bytes)
                    .map_err(|e| TorwerkError::StorageUnavailable(format!("stored token: {e}")))?;

                let issued_at = issued_at
                    .as_deref()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(Utc::now);

                Ok(Some(AuthorizationHeader { token, issued_at }))
            }
        }
    }

    /// Purge the header from both the memory slot and durable storage,
    /// regardless of the active policy. This is the explicit purge for
    /// stale NEVER-after-ALWAYS rows. Idempotent.
    #[instrument(skip(self))]
    pub fn clear(&self) -> Result<()> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        inner.memory = None;
        inner
            .conn
            .execute("DELETE FROM auth_store WHERE key = ?1", params![HEADER_KEY])
            .map_err(storage_err)?;
        info!("authorization header cleared from store");
        Ok(())
    }
}
