//! services/api/src/lib.rs
//!
//! The HTTP service around the entitlement core: configuration, the Postgres and
//! payment-provider adapters, and the axum web layer.

pub mod adapters;
pub mod config;
pub mod error;
pub mod web;
