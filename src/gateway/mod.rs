//! Gateway HTTP surface

pub mod admin;
pub mod flow;
pub mod guard;
pub mod pages;
pub mod router;
pub mod server;
pub mod simulation;

pub use flow::PublicOrigin;
pub use guard::{Authorization, PermissionGuard, authorize};
pub use router::{AppState, create_router};
pub use server::{Gateway, build_state};
