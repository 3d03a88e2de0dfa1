// Templater
// Renders `{{ expression }}` fragments in string templates through the
// expression evaluator. Used to build provider payloads (prompts, shell
// command strings). Escaping is provider-specific and left to adapters.

use serde_json::{Map, Value};

use vantage_expr::{value::to_display_string, Evaluator, ExprError};

/// Appended when a rendered template exceeds the prompt cap.
pub const TRUNCATION_SENTINEL: &str = "\n[truncated]";

pub struct Templater<'a> {
    evaluator: &'a Evaluator,
    prompt_cap: Option<usize>,
}

impl<'a> Templater<'a> {
    pub fn new(evaluator: &'a Evaluator, prompt_cap: Option<usize>) -> Self {
        Self {
            evaluator,
            prompt_cap,
        }
    }

    /// Substitute every `{{ expr }}` in `template` against `scope`.
    pub fn render(&self, template: &str, scope: &Value) -> Result<String, ExprError> {
        let mut rendered = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(open) = rest.find("{{") {
            rendered.push_str(&rest[..open]);
            let after_open = &rest[open + 2..];
            let close = after_open.find("}}").ok_or_else(|| {
                ExprError::parse(open, "unclosed `{{` in template")
            })?;
            let source = &after_open[..close];
            let value = self.evaluator.eval_source(source, scope)?;
            rendered.push_str(&to_display_string(&value));
            rest = &after_open[close + 2..];
        }
        rendered.push_str(rest);
        Ok(self.apply_cap(rendered))
    }

    /// Deep-render a provider params object: every string value anywhere in
    /// the tree goes through `render`; other values pass through unchanged.
    pub fn render_params(
        &self,
        params: &Map<String, Value>,
        scope: &Value,
    ) -> Result<Value, ExprError> {
        let mut rendered = Map::with_capacity(params.len());
        for (key, value) in params {
            rendered.insert(key.clone(), self.render_value(value, scope)?);
        }
        Ok(Value::Object(rendered))
    }

    fn render_value(&self, value: &Value, scope: &Value) -> Result<Value, ExprError> {
        match value {
            Value::String(template) => Ok(Value::String(self.render(template, scope)?)),
            Value::Array(items) => {
                let mut rendered = Vec::with_capacity(items.len());
                for item in items {
                    rendered.push(self.render_value(item, scope)?);
                }
                Ok(Value::Array(rendered))
            }
            Value::Object(map) => {
                let mut rendered = Map::with_capacity(map.len());
                for (key, item) in map {
                    rendered.insert(key.clone(), self.render_value(item, scope)?);
                }
                Ok(Value::Object(rendered))
            }
            other => Ok(other.clone()),
        }
    }

    fn apply_cap(&self, rendered: String) -> String {
        match self.prompt_cap {
            Some(cap) if rendered.chars().count() > cap => {
                let mut truncated: String = rendered.chars().take(cap).collect();
                truncated.push_str(TRUNCATION_SENTINEL);
                truncated
            }
            _ => rendered,
        }
    }
}
