//! Service layer for the publish bridge
//!
//! This module contains the HTTP router and the lifecycle controller that
//! owns the listener and coordinates graceful shutdown.

pub mod http;
pub mod lifecycle;

pub use http::{router, HttpState};
pub use lifecycle::{shutdown_signal, LifecycleController, LifecycleState};
