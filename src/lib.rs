//! # authkit
//!
//! Client-side session and profile state for apps built on a hosted
//! backend-as-a-service platform.
//!
//! The crate keeps an auth session and the signed-in user's profile row in
//! sync with the platform. Credential checks, token issuance, and row
//! storage stay on the platform; this crate only mirrors their results in
//! reactive stores and sequences the profile after the session.
//!
//! Entry point is [`facade::AuthContext`], built from a
//! [`backend::AuthBackend`] and a [`backend::ProfileTable`] (usually the same
//! [`backend::rest::RestBackend`]).

pub mod backend;
pub mod config;
pub mod error;
pub mod facade;
pub mod models;
pub mod store;
