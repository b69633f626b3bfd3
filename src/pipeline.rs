//! Purpose: Apply an ordered list of loaded plugins to a batch of JSON values.
//! Exports: `Pipeline`, `frame_line`.
//! Role: Executor shared by the CLI stream and batch adapters.
//! Invariants: Stages run strictly in list order; each stage finishes before the next starts.
//! Invariants: Every stage receives a sequence; single values are wrapped.
//! Invariants: The first failing stage aborts the record with a `Stage` error naming it.

use std::sync::Arc;

use serde_json::Value;

use crate::core::error::{Error, ErrorKind};
use crate::plugin::Plugin;

#[derive(Clone, Debug, Default)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Plugin>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, plugin: Arc<dyn Plugin>) {
        self.stages.push(plugin);
    }

    pub fn with_stage(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.push(plugin);
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn identities(&self) -> Vec<&str> {
        self.stages.iter().map(|stage| stage.identity()).collect()
    }

    pub async fn run(&self, input: Vec<Value>) -> Result<Vec<Value>, Error> {
        let mut current = input;
        for (index, stage) in self.stages.iter().enumerate() {
            let output = stage
                .call(current)
                .await
                .map_err(|err| stage_error(stage.as_ref(), index, err))?;
            current = output.into_sequence();
        }
        Ok(current)
    }

    /// Frame one input line and run it.
    pub async fn run_line(&self, line: &str) -> Result<Vec<Value>, Error> {
        self.run(frame_line(line)).await
    }
}

fn stage_error(stage: &dyn Plugin, index: usize, err: Error) -> Error {
    let message = format!("stage {index} ({}) failed", stage.identity());
    let hint = err.hint().map(str::to_string);
    let mut wrapped = Error::new(ErrorKind::Stage)
        .with_message(message)
        .with_identity(stage.identity())
        .with_stage(index)
        .with_source(err);
    if let Some(hint) = hint {
        wrapped = wrapped.with_hint(hint);
    }
    wrapped
}

/// Trimmed JSON, or the raw text as a string; non-arrays become one-element arrays.
pub fn frame_line(line: &str) -> Vec<Value> {
    let trimmed = line.trim();
    let value = serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()));
    match value {
        Value::Array(items) => items,
        other => vec![other],
    }
}

#[cfg(test)]
mod tests {
    use super::{Pipeline, frame_line};
    use crate::core::error::{Error, ErrorKind};
    use crate::plugin::{Plugin, StageOutput};
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::sync::{Arc, Mutex};

    #[derive(Debug)]
    struct Arith {
        name: &'static str,
        op: fn(i64) -> i64,
        seen: Mutex<Vec<Vec<Value>>>,
    }

    impl Arith {
        fn stage(name: &'static str, op: fn(i64) -> i64) -> Arc<Self> {
            Arc::new(Self {
                name,
                op,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Plugin for Arith {
        fn identity(&self) -> &str {
            self.name
        }

        async fn call(&self, input: Vec<Value>) -> Result<StageOutput, Error> {
            self.seen.lock().unwrap().push(input.clone());
            let mut out = Vec::new();
            for value in input {
                let Some(n) = value.as_i64() else {
                    return Err(Error::new(ErrorKind::Stage).with_message("not a number"));
                };
                out.push(json!((self.op)(n)));
            }
            Ok(StageOutput::Sequence(out))
        }
    }

    #[derive(Debug)]
    struct Scalar;

    #[async_trait]
    impl Plugin for Scalar {
        fn identity(&self) -> &str {
            "scalar"
        }

        async fn call(&self, input: Vec<Value>) -> Result<StageOutput, Error> {
            Ok(StageOutput::Value(json!(input.len())))
        }
    }

    #[tokio::test]
    async fn stages_apply_in_list_order() {
        let double = Arith::stage("double", |n| n * 2);
        let increment = Arith::stage("increment", |n| n + 1);

        let forward = Pipeline::new()
            .with_stage(double.clone())
            .with_stage(increment.clone());
        assert_eq!(forward.run(vec![json!(3)]).await.unwrap(), vec![json!(7)]);

        let reverse = Pipeline::new().with_stage(increment).with_stage(double);
        assert_eq!(reverse.run(vec![json!(3)]).await.unwrap(), vec![json!(8)]);
        assert_eq!(reverse.identities(), vec!["increment", "double"]);
    }

    #[tokio::test]
    async fn single_values_are_wrapped_for_the_next_stage() {
        let after = Arith::stage("after", |n| n * 10);
        let pipeline = Pipeline::new()
            .with_stage(Arc::new(Scalar))
            .with_stage(after.clone());
        let out = pipeline.run(vec![json!(1), json!(2)]).await.unwrap();
        assert_eq!(out, vec![json!(20)]);
        assert_eq!(after.seen.lock().unwrap()[0], vec![json!(2)]);

        let only = Pipeline::new().with_stage(Arc::new(Scalar));
        assert_eq!(only.run(vec![]).await.unwrap(), vec![json!(0)]);
    }

    #[tokio::test]
    async fn empty_pipeline_is_identity() {
        let pipeline = Pipeline::new();
        assert!(pipeline.is_empty());
        let input = vec![json!({"a": 1}), json!("x")];
        assert_eq!(pipeline.run(input.clone()).await.unwrap(), input);
    }

    #[tokio::test]
    async fn failing_stage_short_circuits() {
        let first = Arith::stage("first", |n| n);
        let never = Arith::stage("never", |n| n);
        let pipeline = Pipeline::new()
            .with_stage(first)
            .with_stage(Arc::new(Scalar))
            .with_stage(Arith::stage("numbers-only", |n| n))
            .with_stage(never.clone());
        let ok = pipeline.run(vec![json!(1)]).await.unwrap();
        assert_eq!(ok, vec![json!(1)]);

        let err = pipeline.run(vec![json!("nope")]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Stage);
        assert_eq!(err.stage(), Some(0));
        assert_eq!(err.identity(), Some("first"));
        assert_eq!(never.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn lines_are_framed_before_the_first_stage() {
        let recorder = Arith::stage("recorder", |n| n);
        let pipeline = Pipeline::new().with_stage(recorder.clone());
        let _ = pipeline.run_line("hello").await;
        assert_eq!(recorder.seen.lock().unwrap()[0], vec![json!("hello")]);

        assert_eq!(frame_line("  {\"a\":1}\n"), vec![json!({"a": 1})]);
        assert_eq!(frame_line("[1,2]"), vec![json!(1), json!(2)]);
        assert_eq!(frame_line("3"), vec![json!(3)]);
    }
}
