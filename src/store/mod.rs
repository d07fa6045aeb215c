//! Reactive state containers.
//!
//! DESIGN
//! ======
//! State is split by domain (`auth`, `profile`, `app`) so consumers can
//! depend on small focused models. Each store owns a `watch` sender; the
//! only way to change state is through the store's own methods, and
//! consumers observe snapshots via `subscribe()`.

pub mod app;
pub mod auth;
pub mod profile;
