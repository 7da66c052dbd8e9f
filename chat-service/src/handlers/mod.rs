//! HTTP handlers for the chat service.

pub mod chat;
pub mod conversations;
pub mod course;
