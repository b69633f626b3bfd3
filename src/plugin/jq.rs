// Plugin whose callable is a jq program evaluated in-process with jaq.
use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use jaq_core::load::{Arena, File, Loader};
use jaq_core::{Compiler, Ctx, Native, RcIter};
use serde_json::Value;

use crate::core::error::{Error, ErrorKind};
use crate::plugin::jq_value::JqValue;
use crate::plugin::{Plugin, StageOutput};

pub struct JqPlugin {
    identity: String,
    path: PathBuf,
    filter: jaq_core::Filter<Native<JqValue>>,
}

impl fmt::Debug for JqPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JqPlugin")
            .field("identity", &self.identity)
            .field("path", &self.path)
            .finish()
    }
}

impl JqPlugin {
    /// Compile `code` (read from `path`) into a callable for `identity`.
    pub fn compile(identity: &str, code: &str, path: &Path) -> Result<Self, Error> {
        let arena = Arena::default();
        let loader = Loader::new(jaq_std::defs());
        let program = File { code, path: () };
        let modules = loader
            .load(&arena, program)
            .map_err(|errs| compile_error(identity, path, errs))?;
        let filter = Compiler::default()
            .with_funs(jaq_std::funs::<JqValue>())
            .compile(modules)
            .map_err(|errs| compile_error(identity, path, errs))?;
        Ok(Self {
            identity: identity.to_string(),
            path: path.to_path_buf(),
            filter,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn evaluate(&self, input: Vec<Value>) -> Result<StageOutput, Error> {
        let input = JqValue::from_json(&Value::Array(input));
        let inputs = RcIter::new(core::iter::empty::<Result<JqValue, String>>());
        let mut outputs = Vec::new();
        for item in self.filter.run((Ctx::new([], &inputs), input)) {
            match item {
                Ok(value) => outputs.push(value.into_json()),
                Err(err) => {
                    return Err(Error::new(ErrorKind::Stage)
                        .with_message(format!("jq program raised an error: {err}"))
                        .with_hint("Run the program with jq against the same input to see the failure.")
                        .with_identity(&self.identity)
                        .with_path(&self.path));
                }
            }
        }
        Ok(match outputs.len() {
            0 => StageOutput::Sequence(Vec::new()),
            1 => StageOutput::from_value(outputs.remove(0)),
            _ => StageOutput::Sequence(outputs),
        })
    }
}

fn compile_error<E: fmt::Debug>(identity: &str, path: &Path, err: E) -> Error {
    Error::new(ErrorKind::Load)
        .with_message("jq program does not compile")
        .with_hint(format!("Details: {err:?}"))
        .with_identity(identity)
        .with_path(path)
}

#[async_trait]
impl Plugin for JqPlugin {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn call(&self, input: Vec<Value>) -> Result<StageOutput, Error> {
        self.evaluate(input)
    }
}
