//! reqflow library interface
//!
//! Executes HTTP requests and ordered collections of them: variables and
//! environment parameters are resolved into live and redacted copies,
//! authorization is inherited down the collection tree, size ceilings are
//! enforced around the transport, and post-scripts can redirect the walk.
//!
//! # Module Organization
//!
//! - [`template`] - variable, environment and macro resolution
//! - [`auth`] - authorization strategies and inheritance
//! - [`http`] - entity building, size checks, sending
//! - [`engine`] - single-step execution and collection runs
//! - [`delivery`] - subscriber channels and the event bus
//! - [`errors`] - error taxonomy (ReqflowError, Result)

pub mod auth;
pub mod cli;
pub mod config;
pub mod context;
pub mod crypto;
pub mod delivery;
pub mod engine;
pub mod environment;
pub mod errors;
pub mod http;
pub mod locks;
pub mod metrics;
pub mod models;
pub mod scripting;
pub mod status;
pub mod template;

pub use errors::{ReqflowError, Result};
