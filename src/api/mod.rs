//! REST API.
//!
//! Routes are nested under `/api/` behind an auth → audit middleware stack;
//! `router::app_router()` returns a `Router` that can be mounted on any
//! axum server instance, and `server` runs it.

pub mod endpoints;
pub mod error;
pub mod middleware;
pub mod router;
pub mod server;
pub mod types;

pub use error::ApiError;
pub use router::{app_router, build_router};
pub use server::{start_server, ApiServer};
pub use types::{ApiContext, Requester};
