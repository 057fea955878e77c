//! Types and codec for the aria2 JSON-RPC dialect.
//!
//! This crate does not own a transport. It encodes requests, decodes whatever
//! the daemon pushes back (responses and notifications) and models the
//! payloads the download service cares about.

use serde_json::Value;

pub mod models;
pub mod options;
pub mod rpc;

pub use models::{File, Status, Version};
pub use options::AddUriOptions;
pub use rpc::{Incoming, Notification, NotificationKind, Request, Response};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("unexpected message: {0}")]
    Unexpected(Value),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
