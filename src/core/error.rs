// Typed runtime errors with builder-style context and stable exit codes.
use std::error::Error as StdError;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Internal,
    Usage,
    NotFound,
    SpecifierParse,
    VersionConstraint,
    Install,
    Manifest,
    Load,
    Stage,
    Io,
}

/// Error shared by every layer of the runtime.
///
/// Cloneable so single-flight installs can hand the same failure to every waiter; the
/// source chain is reference counted for that reason.
#[derive(Clone, Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    hint: Option<String>,
    path: Option<PathBuf>,
    specifier: Option<String>,
    identity: Option<String>,
    stage: Option<usize>,
    required: Option<String>,
    actual: Option<String>,
    source: Option<Arc<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            hint: None,
            path: None,
            specifier: None,
            identity: None,
            stage: None,
            required: None,
            actual: None,
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn specifier(&self) -> Option<&str> {
        self.specifier.as_deref()
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn stage(&self) -> Option<usize> {
        self.stage
    }

    /// Required version range of a `VersionConstraint` error.
    pub fn required(&self) -> Option<&str> {
        self.required.as_deref()
    }

    /// Version that was actually installed for a `VersionConstraint` error.
    pub fn actual(&self) -> Option<&str> {
        self.actual.as_deref()
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_specifier(mut self, specifier: impl Into<String>) -> Self {
        self.specifier = Some(specifier.into());
        self
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    pub fn with_stage(mut self, index: usize) -> Self {
        self.stage = Some(index);
        self
    }

    pub fn with_versions(mut self, required: impl Into<String>, actual: impl Into<String>) -> Self {
        self.required = Some(required.into());
        self.actual = Some(actual.into());
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Attach the specifier unless an inner layer already recorded one.
    pub fn or_specifier(self, specifier: impl Into<String>) -> Self {
        if self.specifier.is_some() {
            return self;
        }
        self.with_specifier(specifier)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(specifier) = &self.specifier {
            write!(f, " (specifier: {specifier})")?;
        }
        if let Some(identity) = &self.identity {
            write!(f, " (identity: {identity})")?;
        }
        if let Some(stage) = self.stage {
            write!(f, " (stage: {stage})")?;
        }
        if let (Some(required), Some(actual)) = (&self.required, &self.actual) {
            write!(f, " (required: {required}, actual: {actual})")?;
        }
        if let Some(path) = &self.path {
            write!(f, " (path: {})", path.display())?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

pub fn to_exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Internal => 1,
        ErrorKind::Usage => 2,
        ErrorKind::NotFound => 3,
        ErrorKind::SpecifierParse => 4,
        ErrorKind::VersionConstraint => 5,
        ErrorKind::Install => 6,
        ErrorKind::Manifest => 7,
        ErrorKind::Load => 8,
        ErrorKind::Stage => 9,
        ErrorKind::Io => 10,
    }
}

pub(crate) fn io_error(err: std::io::Error, message: &str, path: &Path) -> Error {
    let kind = match err.kind() {
        std::io::ErrorKind::NotFound => ErrorKind::NotFound,
        _ => ErrorKind::Io,
    };
    Error::new(kind)
        .with_message(message)
        .with_path(path)
        .with_source(err)
}
