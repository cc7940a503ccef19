// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Torwerk — bridge layer.
//
// Exposes the authorization engine to a cross-platform application shell
// as name-dispatched message calls with positional JSON arguments. The
// bridge contains no authorization logic of its own: it validates
// arguments, forwards to the `AuthorizationManager`, and serializes the
// result back across the boundary. Every call yields exactly one terminal
// reply.

pub mod call;
pub mod dispatch;
pub mod remote;

pub use call::{BridgeCall, BridgeReply, CallId, ReplyStatus};
pub use dispatch::Bridge;
pub use remote::{ChallengeEvent, RemoteChallengeHandler};
