//! Templated-text bodies
//!
//! Bodies of type `template` are rendered with Tera after variable
//! resolution. Every variable of the merged scope table is available by name.

use indexmap::IndexMap;
use tera::{Context, Tera};

use crate::errors::Result;

/// Templating collaborator for text bodies
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, template: &str, vars: &IndexMap<String, String>) -> Result<String>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TeraRenderer;

impl TemplateRenderer for TeraRenderer {
    fn render(&self, template: &str, vars: &IndexMap<String, String>) -> Result<String> {
        let mut context = Context::new();
        for (name, value) in vars {
            context.insert(name.as_str(), value);
        }
        Ok(Tera::one_off(template, &context, false)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_with_scope() {
        let mut vars = IndexMap::new();
        vars.insert("user".to_string(), "ada".to_string());
        let out = TeraRenderer
            .render(r#"{"name": "{{ user | upper }}"}"#, &vars)
            .unwrap();
        assert_eq!(out, r#"{"name": "ADA"}"#);
    }

    #[test]
    fn test_render_loop() {
        let out = TeraRenderer
            .render("{% for i in [1, 2, 3] %}{{ i }}{% endfor %}", &IndexMap::new())
            .unwrap();
        assert_eq!(out, "123");
    }

    #[test]
    fn test_invalid_template_errors() {
        assert!(TeraRenderer.render("{{ unclosed", &IndexMap::new()).is_err());
    }
}
