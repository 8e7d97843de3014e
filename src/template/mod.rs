//! Placeholder and template resolution

pub mod environment;
pub mod magic;
pub mod render;
pub mod variables;

pub use environment::{EnvGrammar, EnvParameterResolver, UnresolvedVariables};
pub use magic::{DecryptingScope, MacroEvaluator, MacroScope, MagicMacroEvaluator};
pub use render::{TemplateRenderer, TeraRenderer};
pub use variables::{ResolvedRequest, VariableResolver};
