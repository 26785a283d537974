//! HTTP request handlers for the REST API.

pub mod conversations;
pub mod health;
pub mod knowledge;
pub mod maintenance;
pub mod search;
