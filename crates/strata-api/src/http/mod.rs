//! HTTP/REST API layer for Strata.
//!
//! Axum-based REST API at `/api/v1/` with shared-secret authentication,
//! envelope response format, and CORS support.

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod response;
pub mod router;
