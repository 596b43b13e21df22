//! # Reply Companion Core
//!
//! Shared, runtime-agnostic logic for Reply Companion: data models, the
//! storage traits, the per-post result cache, and the panel session
//! controller that keeps generated replies alive across post switches and
//! panel teardown.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or other
//! native-only dependencies. It compiles to both native targets and
//! `wasm32-unknown-unknown`.

pub mod artifact_cache;
pub mod models;
pub mod session;
pub mod store;
