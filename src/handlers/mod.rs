/// HTTP handlers module
/// Provides REST, webhook and WebSocket endpoints

pub mod auth;
pub mod conversations;
pub mod messages;
pub mod rest;
pub mod webhook;
pub mod websocket;

pub use auth::{Caller, MaybeCaller, SUBJECT_HEADER};
pub use websocket::{ws_connect, ChangeEvent, WsServer};
