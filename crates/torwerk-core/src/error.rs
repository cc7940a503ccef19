// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Torwerk.
//
// Every variant carries owned `String` detail so the enum is `Clone` —
// obtain outcomes are fanned out verbatim to every coalesced waiter.

use thiserror::Error;

/// Top-level error type for all Torwerk operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TorwerkError {
    // -- Policy --
    #[error("unsupported persistence policy: {0}")]
    InvalidPolicy(String),

    // -- Challenge resolution --
    #[error("no challenge handler available")]
    NoHandlerAvailable,

    #[error("challenge handler failed: {cause}")]
    HandlerFailed { cause: String },

    // -- Storage / persistence --
    #[error("durable storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    // -- Bridge boundary --
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("bridge error: {0}")]
    Bridge(String),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, TorwerkError>;
