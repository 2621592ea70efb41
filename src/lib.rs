/// Huddle server library
///
/// Stores for relationships, conversations, messages, invitations and presence,
/// plus the HTTP and WebSocket surface that exposes them.
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod server;
pub mod signature;

pub use error::{ChatError, ChatResult, ErrorKind};
