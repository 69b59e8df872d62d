//! Correlated request/reply over the transport layer.
//!
//! The client ships an ordered record sequence to the conversion service and
//! waits for its answer; the server side consumes the request queue and
//! replies to whatever queue each request names.

pub mod client;
pub mod server;
pub mod types;

pub use client::RpcClient;
pub use server::{BoundServer, MarkdownHandler, RequestHandler, RpcServer};
pub use types::{RpcEnvelope, RpcResponse};
