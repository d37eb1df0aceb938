//! Model capability lookup.
//!
//! The only capability the core needs is the context window, which bounds
//! the send budget of every turn and the chunk size of every summary.

use std::collections::HashMap;

/// Context windows of the models the agent ships with, in tokens.
///
/// OpenRouter ids first, then the Groq names the same models go by
/// elsewhere.
const BUILTIN_CONTEXT_WINDOWS: &[(&str, usize)] = &[
    ("meta-llama/llama-3-8b-instruct", 8000),
    ("meta-llama/llama-3.1-70b-instruct", 8000),
    ("llama3-8b-8192", 8000),
    ("llama-3.1-70b-versatile", 8000),
];

fn builtin_window(id: &str) -> Option<usize> {
    BUILTIN_CONTEXT_WINDOWS
        .iter()
        .find(|(known, _)| *known == id)
        .map(|&(_, window)| window)
}

/// Resolves a model identifier to its maximum context window.
pub trait ModelCatalog: Send + Sync {
    fn context_window(&self, model: &str) -> Option<usize>;
}

/// Built-in table plus caller-supplied overrides.
#[derive(Debug, Clone, Default)]
pub struct StaticModelCatalog {
    overrides: HashMap<String, usize>,
}

impl StaticModelCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the context window for a model.
    pub fn with_model(mut self, model: impl Into<String>, context_window: usize) -> Self {
        self.overrides.insert(model.into(), context_window);
        self
    }
}

impl ModelCatalog for StaticModelCatalog {
    fn context_window(&self, model: &str) -> Option<usize> {
        if let Some(&window) = self.overrides.get(model) {
            return Some(window);
        }
        // Provider-prefixed aliases like "groq/llama3-8b-8192" match by name.
        builtin_window(model).or_else(|| builtin_window(model.rsplit('/').next()?))
    }
}
