//! latex2gmd: LaTeX to GitHub-flavored Markdown over a message broker.

pub mod app;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod render;
pub mod rpc;
pub mod transport;
