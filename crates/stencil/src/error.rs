use crate::parser::{Construct, Span};
use ariadne::{Config, Label, Report, ReportKind, Source};
use std::fmt;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
    #[error("page state moved from version {expected} to {found} before the update was committed")]
    StaleUpdate { expected: u64, found: u64 },
}

/// Template could not be compiled. `span` is a byte range into the source.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseErrorKind {
    #[error("unclosed action")]
    UnclosedAction,
    #[error("unclosed comment")]
    UnclosedComment,
    #[error("missing value for command")]
    EmptyAction,
    #[error("{0}")]
    Syntax(String),
    #[error("unexpected `{0}`")]
    Unexpected(String),
    #[error("`{0}` requires a pipeline")]
    MissingPipeline(&'static str),
    #[error("`{0}` requires a quoted template name")]
    MissingName(&'static str),
    #[error("`else` after `else` in {0}")]
    DuplicateElse(Construct),
    #[error("`else` is not allowed in {0}")]
    ElseNotAllowed(Construct),
    #[error("`define` is only allowed at the top level")]
    NestedDefine,
    #[error("unterminated {0}, missing `end`")]
    Unterminated(Construct),
    #[error("template `{0}` is defined more than once")]
    DuplicateDefinition(String),
    #[error("no template named `{0}`")]
    UnknownTemplate(String),
    #[error("template cycle: {}", .0.join(" -> "))]
    CyclicTemplate(Vec<String>),
    #[error("templates nested deeper than {0} levels")]
    IncludeDepthExceeded(usize),
    #[error("function `{0}` is not defined")]
    UnknownFunction(String),
    #[error("undefined variable `${0}`")]
    UndefinedVariable(String),
}

impl ParseError {
    pub fn new(kind: ParseErrorKind, span: impl Into<Span>) -> Self {
        Self {
            kind,
            span: span.into(),
        }
    }

    /// Renders the error against its source as a plain-text diagnostic.
    pub fn report(&self, filename: &str, source: &str) -> String {
        report(filename, source, self.span, &self.kind)
    }
}

/// Template failed while being applied to data.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}")]
pub struct EvaluationError {
    pub kind: EvaluationErrorKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationErrorKind {
    #[error("map has no entry for key `{0}`")]
    MissingField(String),
    #[error("can't evaluate field `{field}` in type {found}")]
    NotAMap { field: String, found: &'static str },
    #[error("range can't iterate over {0}")]
    CannotIterate(&'static str),
    #[error("can't give argument to non-function {0}")]
    NotCallable(String),
    #[error("undefined variable `${0}`")]
    UndefinedVariable(String),
    #[error("function `{0}` is not defined")]
    UnknownFunction(String),
    #[error("wrong number of args for {name}: want {expected} got {found}")]
    ArgumentCount {
        name: String,
        expected: String,
        found: usize,
    },
    #[error("error calling {name}: {message}")]
    Function { name: String, message: String },
}

impl EvaluationError {
    pub fn new(kind: EvaluationErrorKind, span: Span) -> Self {
        Self { kind, span }
    }

    pub fn report(&self, filename: &str, source: &str) -> String {
        report(filename, source, self.span, &self.kind)
    }
}

/// A render tree that breaks the statics/dynamics shape contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("{statics} statics for {dynamics} dynamics at `{path}`")]
    StaticsMismatch {
        path: String,
        statics: usize,
        dynamics: usize,
    },
    #[error("comprehension item {item} at `{path}` has {dynamics} dynamics for {statics} statics")]
    ItemMismatch {
        path: String,
        item: usize,
        statics: usize,
        dynamics: usize,
    },
    #[error("slot key {key} assigned twice at `{path}`")]
    KeyCollision { path: String, key: u32 },
}

fn report(filename: &str, source: &str, span: Span, message: &impl fmt::Display) -> String {
    let range = span.into_range();
    let mut bytes = Vec::new();
    let written = Report::build(ReportKind::Error, (filename, range.clone()))
        .with_config(Config::default().with_color(false))
        .with_message(message.to_string())
        .with_label(Label::new((filename, range)).with_message(message.to_string()))
        .finish()
        .write((filename, Source::from(source)), &mut bytes);
    match written {
        Ok(()) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(_) => message.to_string(),
    }
}
