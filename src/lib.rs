//! Quotagate - Multi-Tier Distributed Rate Limiting Gate
//!
//! This crate implements a rate limiting gate that sits in front of API
//! business logic. Concurrent request handlers coordinate through a shared
//! counter store, so limits hold across process and instance boundaries.
//! Four dimensions are checked per request: a per-identity sliding window,
//! a per-identity burst window, a per-source-address window, and a global
//! window. Store failures degrade to fail-open.

pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod limiter;
pub mod policy;
pub mod store;
