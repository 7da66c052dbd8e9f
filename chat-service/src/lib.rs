//! Course-scoped streaming chat service.
//!
//! Authorizes course ("tenant") requests against graded access levels,
//! then streams multi-stage conversation lifecycle events to the client
//! over a single server-push response.

pub mod access;
pub mod config;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;
pub mod stream;
