//! Variable scopes consulted during templating

mod resolving;

pub use resolving::{ResolvingContext, Scope};
