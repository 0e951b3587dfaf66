//! Template engine wrapper.
//!
//! Templates are rendered by `minijinja` with strict undefined handling, the
//! merged data tree as context, the shared templates from the source tree and
//! the functions in [`funcs`].

pub mod data;
pub mod funcs;

use std::sync::Arc;

use minijinja::{Environment, UndefinedBehavior};
use serde_json::{Map, Value};

pub use funcs::{FuncContext, Secrets};

use crate::error::EvalError;
use crate::source::{MarkerRenderer, SourceData};

/// Inputs shared by every engine built during a run.
#[derive(Debug, Clone)]
pub struct TemplateContext {
    /// Function inputs.
    pub funcs: FuncContext,
    /// Computed facts.
    pub facts: Map<String, Value>,
    /// `[data]` from the config file.
    pub config_data: Map<String, Value>,
    /// Command-line overrides.
    pub overrides: Map<String, Value>,
}

impl TemplateContext {
    /// Build an engine for a source tree's data and shared templates.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError::Template`] if a shared template does not parse.
    pub fn engine(&self, source: &SourceData) -> Result<TemplateEngine, EvalError> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_keep_trailing_newline(true);
        funcs::register(&mut env, &self.funcs);
        for (name, text) in &source.templates {
            env.add_template_owned(name.clone(), text.clone())
                .map_err(|e| template_error(name, &e))?;
        }
        let data = data::layered(
            self.facts.clone(),
            &[&source.data, &self.config_data, &self.overrides],
        );
        Ok(TemplateEngine {
            env: Arc::new(env),
            data: Value::Object(data),
        })
    }
}

impl MarkerRenderer for TemplateContext {
    fn render_marker(
        &self,
        name: &str,
        contents: &str,
        source: &SourceData,
    ) -> Result<String, EvalError> {
        self.engine(source)?.render(name, contents, None)
    }
}

/// A configured environment plus the data it renders against.
#[derive(Debug, Clone)]
pub struct TemplateEngine {
    env: Arc<Environment<'static>>,
    data: Value,
}

impl TemplateEngine {
    /// The merged data tree.
    #[must_use]
    pub const fn data(&self) -> &Value {
        &self.data
    }

    /// Render `source`, naming it `name` in errors.
    ///
    /// `files` sets `dotstate.source_file` and `dotstate.target_file`.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError::Template`] on syntax or execution errors.
    pub fn render(
        &self,
        name: &str,
        source: &str,
        files: Option<(&str, &str)>,
    ) -> Result<String, EvalError> {
        let mut ctx = self.data.clone();
        if let Some((source_file, target_file)) = files
            && let Some(Value::Object(facts)) = ctx.get_mut(data::FACTS_KEY)
        {
            facts.insert("source_file".to_string(), Value::from(source_file));
            facts.insert("target_file".to_string(), Value::from(target_file));
        }
        self.env
            .render_named_str(name, source, ctx)
            .map_err(|e| template_error(name, &e))
    }
}

/// Flatten a minijinja error and its causes into an [`EvalError::Template`].
fn template_error(name: &str, err: &minijinja::Error) -> EvalError {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    EvalError::Template {
        path: name.to_string(),
        message,
    }
}
