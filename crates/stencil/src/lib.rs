//! Live-render templates.
//!
//! A template is compiled once into a tree of blocks whose literal text is
//! laid out ahead of time. Rendering it against data yields a [`RenderTree`]
//! of shared statics and per-render dynamics, and [`diff`] turns two
//! consecutive renders into the [`Fragment`]s a statics-caching client needs
//! to catch up.
//!
//! ```
//! use stencil::{Template, Value};
//!
//! let template = Template::compile("<div>Counter: {{.Counter}}</div>").unwrap();
//! let before = template.render(&Value::map([("Counter", Value::Int(1))])).unwrap();
//! let after = template.render(&Value::map([("Counter", Value::Int(2))])).unwrap();
//! let fragments = stencil::diff(&before, &after);
//! assert_eq!(fragments[0].id, "0");
//! assert_eq!(fragments[0].data, "2");
//! ```

mod diff;
mod encode;
pub mod error;
mod eval;
pub mod keys;
mod options;
mod page;
pub mod parser;
mod render;
mod template;
mod value;

pub use error::{Error, EvaluationError, EvaluationErrorKind, InvariantViolation, ParseError, ParseErrorKind, Result};
pub use eval::{Function, FunctionError, Functions};
pub use options::{CompileOptions, DiffOptions, GranularBudget};
pub use page::{Application, Page, PageId, PendingUpdate};
pub use render::{Comprehension, Dynamic, RenderTree};
pub use stencil_protocol::{Action, ClientView, Fragment, ListOp, Marker, Strategy};
pub use template::{ResolvedBlock, ResolvedNode, Template};
pub use value::Value;

/// Compiles `source` with default options and the builtin functions.
pub fn compile(source: impl Into<String>) -> Result<Template, ParseError> {
    Template::compile(source)
}

/// Fragments bringing a client that holds `previous` up to `next`.
pub fn diff(previous: &RenderTree, next: &RenderTree) -> Vec<Fragment> {
    diff_with(previous, next, &DiffOptions::default())
}

pub fn diff_with(previous: &RenderTree, next: &RenderTree, options: &DiffOptions) -> Vec<Fragment> {
    encode::fragments(diff::compare(previous, next, options))
}

/// Wire form of a full render tree, as sent when a client connects.
pub fn to_wire(tree: &RenderTree) -> serde_json::Value {
    encode::to_json(tree)
}
