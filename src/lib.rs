//! Scorta: an offline-first caching gateway.
//!
//! Scorta fronts a web application and keeps a set of named, versioned
//! cache partitions so the app shell, images, and previously visited pages
//! stay serveable when the upstream is unreachable. Each intercepted
//! request is classified once and handled by the strategy bound to its
//! class; API traffic is never cached. Foreground clients can subscribe to
//! control messages and ask for a full partition wipe before reloading.

pub mod config;
pub mod controller;
pub mod domain;
pub mod error;
pub mod infra;
pub mod refresh;
pub mod store;

pub use error::AppError;
