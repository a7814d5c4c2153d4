//! # catalog-api
//!
//! The HTTP composition root: discovery and health endpoints, the
//! per-plugin management router (spec §4.J), RBAC, and the background
//! reconciliation loop that keeps running plugins in sync with the
//! versioned config store (spec §4.K).
//!
//! Everything a plugin exposes beyond its own `register_routes()` surface
//! goes through [`management::mount`], built once per plugin by
//! [`Server::router`] and wired with that plugin's capability probes,
//! action dispatcher, refresh limiter, and refresh-status store.

mod error;
mod management;
mod middleware;
mod role;
mod server;

pub use error::ApiError;
pub use management::{mount, ManagementContext, ReinitFn};
pub use role::{HeaderRoleExtractor, Role, RoleExtractor};
pub use server::{Server, ServerConfig};
