//! Template evaluation for button labels and colors

use minijinja::Environment;
use serde_json::Value;

use crate::error::{Error, Result};

/// Evaluates a template string against a JSON context
pub trait TemplateEngine: Send + Sync {
    fn evaluate(&self, template: &str, context: &Value) -> Result<String>;
}

/// Jinja-compatible engine (`{{ state.state }}`, `{% if %}`, filters)
pub struct JinjaTemplates {
    env: Environment<'static>,
}

impl JinjaTemplates {
    pub fn new() -> Self {
        Self {
            env: Environment::new(),
        }
    }
}

impl Default for JinjaTemplates {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine for JinjaTemplates {
    fn evaluate(&self, template: &str, context: &Value) -> Result<String> {
        if !is_template(template) {
            return Ok(template.to_string());
        }
        self.env
            .render_str(template, context)
            .map_err(|e| Error::Template(format!("'{}': {}", template, e)))
    }
}

/// Whether a string contains any Jinja syntax at all
pub fn is_template(text: &str) -> bool {
    text.contains("{{") || text.contains("{%") || text.contains("{#")
}
