use crate::error::{EvaluationError, ParseError};
use crate::eval::Functions;
use crate::keys::{self, Layout};
use crate::options::CompileOptions;
use crate::parser::{self, Pipeline, Resolution, SourceCode, Span, StrSlice};
use crate::render::{self, RenderTree};
use crate::value::Value;
use indexmap::IndexMap;
use log::debug;
use std::sync::Arc;

/// A node of a template after composition: `define`s are gone and every
/// `template`/`block` invocation points at the body it includes.
#[derive(Debug, Clone)]
pub enum ResolvedNode {
    Literal(StrSlice),
    Interpolation {
        pipeline: Pipeline,
        span: Span,
    },
    // A pipeline that only declares or assigns variables and prints nothing.
    Binding {
        pipeline: Pipeline,
        span: Span,
    },
    Conditional {
        condition: Pipeline,
        then_body: ResolvedBlock,
        else_body: Option<ResolvedBlock>,
        span: Span,
    },
    Iteration {
        collection: Pipeline,
        item_body: ResolvedBlock,
        else_body: Option<ResolvedBlock>,
        span: Span,
    },
    Scope {
        value: Pipeline,
        body: ResolvedBlock,
        else_body: Option<ResolvedBlock>,
        span: Span,
    },
    Include {
        name: String,
        argument: Option<Pipeline>,
        body: Arc<ResolvedBlock>,
        span: Span,
    },
}

/// A sequence of nodes together with its statics layout.
#[derive(Debug, Clone)]
pub struct ResolvedBlock {
    nodes: Vec<ResolvedNode>,
    layout: Layout,
}

impl ResolvedBlock {
    pub(crate) fn new(nodes: Vec<ResolvedNode>) -> Self {
        let layout = keys::layout(&nodes);
        Self { nodes, layout }
    }

    pub fn nodes(&self) -> &[ResolvedNode] {
        &self.nodes
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }
}

/// A compiled template. Immutable, so one instance can back any number of
/// concurrent renders.
#[derive(Debug, Clone)]
pub struct Template {
    source: SourceCode,
    root: ResolvedBlock,
    definitions: IndexMap<String, Arc<ResolvedBlock>>,
    functions: Functions,
}

impl Template {
    pub fn compile(source: impl Into<String>) -> Result<Self, ParseError> {
        Self::compile_with(source, &CompileOptions::default(), Functions::default())
    }

    pub fn compile_with(
        source: impl Into<String>,
        options: &CompileOptions,
        functions: Functions,
    ) -> Result<Self, ParseError> {
        let source = SourceCode::new(source.into());
        let ast = parser::parse(&source)?;
        let Resolution { root, definitions } = parser::resolve(&ast, &functions, options)?;
        debug!(
            "compiled template of {} bytes: {} root slots, {} definitions",
            source.len(),
            root.layout().slot_count(),
            definitions.len()
        );
        Ok(Self {
            source,
            root,
            definitions,
            functions,
        })
    }

    /// Applies the template to `data`, producing a render tree.
    pub fn render(&self, data: &Value) -> Result<RenderTree, EvaluationError> {
        render::compile(self, data)
    }

    /// Applies the template to `data`, writing text directly.
    pub fn execute(&self, data: &Value) -> Result<String, EvaluationError> {
        render::execute(self, data)
    }

    pub fn source(&self) -> &str {
        self.source.as_str()
    }

    /// Names of all `define`d and `block` templates, in source order.
    pub fn definitions(&self) -> impl Iterator<Item = &str> {
        self.definitions.keys().map(String::as_str)
    }

    pub fn definition(&self, name: &str) -> Option<&ResolvedBlock> {
        self.definitions.get(name).map(Arc::as_ref)
    }

    pub fn root(&self) -> &ResolvedBlock {
        &self.root
    }

    pub fn functions(&self) -> &Functions {
        &self.functions
    }
}
