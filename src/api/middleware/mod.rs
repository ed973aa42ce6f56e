//! API middleware stack.
//!
//! Execution order (outermost → innermost):
//! 1. Auth: token verification, injects `Requester`
//! 2. Audit logger: logs after auth, has the user id

pub mod audit;
pub mod auth;
