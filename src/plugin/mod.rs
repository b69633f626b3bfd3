//! Purpose: The callable exported by an installed module.
//! Exports: `Plugin`, `StageOutput`, `function_name`, `JqPlugin`, `CommandPlugin`.
//! Role: Pipeline stages are `Arc<dyn Plugin>`; the loader builds the concrete kinds.
//! Invariants: Plugins are immutable once loaded and safe to share across tasks.
//! Invariants: A plugin receives a sequence and returns either one value or a sequence.

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::error::Error;

pub mod command;
pub mod jq;
mod jq_value;

pub use command::CommandPlugin;
pub use jq::JqPlugin;

#[async_trait]
pub trait Plugin: Send + Sync + fmt::Debug {
    /// Canonical identity recorded in the installed manifest.
    fn identity(&self) -> &str;

    fn function_name(&self) -> String {
        function_name(self.identity())
    }

    async fn call(&self, input: Vec<Value>) -> Result<StageOutput, Error>;
}

#[derive(Clone, Debug, PartialEq)]
pub enum StageOutput {
    Value(Value),
    Sequence(Vec<Value>),
}

impl StageOutput {
    /// Arrays become sequences; anything else stays a single value.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Array(items) => Self::Sequence(items),
            other => Self::Value(other),
        }
    }

    /// Input for the next stage: a single value is wrapped in a one-element sequence.
    pub fn into_sequence(self) -> Vec<Value> {
        match self {
            Self::Value(value) => vec![value],
            Self::Sequence(items) => items,
        }
    }
}

/// Display name for a module: scope stripped, kebab-case camelized.
pub fn function_name(identity: &str) -> String {
    let bare = match identity.strip_prefix('@') {
        Some(scoped) => scoped.split_once('/').map_or(scoped, |(_, name)| name),
        None => identity,
    };
    let mut out = String::with_capacity(bare.len());
    let mut upper_next = false;
    for ch in bare.chars() {
        if ch == '-' {
            upper_next = true;
            continue;
        }
        if upper_next {
            out.extend(ch.to_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{StageOutput, function_name};
    use serde_json::json;

    #[test]
    fn function_names_strip_scope_and_camelize() {
        assert_eq!(function_name("@acme/to-upper"), "toUpper");
        assert_eq!(function_name("double"), "double");
        assert_eq!(function_name("add-one-more"), "addOneMore");
    }

    #[test]
    fn single_values_wrap_into_sequences() {
        assert_eq!(StageOutput::from_value(json!(5)).into_sequence(), vec![json!(5)]);
        assert_eq!(
            StageOutput::from_value(json!([1, 2])).into_sequence(),
            vec![json!(1), json!(2)]
        );
        assert_eq!(
            StageOutput::from_value(json!({"a": 1})),
            StageOutput::Value(json!({"a": 1}))
        );
    }
}
