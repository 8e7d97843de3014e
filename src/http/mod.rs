//! HTTP execution core
//!
//! Entity construction, size ceilings, per-request client toggles, sending
//! and response capture.

pub mod client;
pub mod entity;
pub mod executor;
pub mod response;
pub mod size;

pub use client::{build_url, ClientFactory, USER_AGENT_STRING};
pub use entity::{build_entity, Entity};
pub use executor::{Exchange, HttpExecutor};
pub use response::{detect_body_type, parse_cookies, ResponseData};
