use super::{Ast, BindingKind, Body, Command, Node, Operand, Pipeline, Span, Spanned};
use crate::error::{ParseError, ParseErrorKind};
use crate::eval::Functions;
use crate::options::CompileOptions;
use crate::template::{ResolvedBlock, ResolvedNode};
use indexmap::IndexMap;
use log::trace;
use std::collections::HashMap;
use std::sync::Arc;

pub(crate) struct Resolution {
    pub root: ResolvedBlock,
    pub definitions: IndexMap<String, Arc<ResolvedBlock>>,
}

#[derive(Debug, Clone, Copy)]
struct Definition<'code> {
    body: &'code Body,
    span: Span,
}

/// Variables visible at a point of the template, innermost last.
#[derive(Debug, Default)]
struct Referenceables<'code> {
    declared: Vec<&'code str>,
}

impl<'code> Referenceables<'code> {
    fn level(&self) -> usize {
        self.declared.len()
    }

    fn truncate(&mut self, level: usize) {
        self.declared.truncate(level);
    }

    fn declare(&mut self, name: &'code str) {
        self.declared.push(name);
    }

    fn contains(&self, name: &str) -> bool {
        self.declared.iter().rev().any(|declared| *declared == name)
    }
}

/// Inlines `{{template}}` invocations and checks every function and variable
/// reference. Each definition is resolved once and shared by all its call
/// sites.
pub(crate) fn resolve(
    ast: &Ast,
    functions: &Functions,
    options: &CompileOptions,
) -> Result<Resolution, ParseError> {
    let mut definitions = IndexMap::new();
    collect_definitions(&ast.root, &mut definitions)?;
    let mut resolver = TemplateResolver {
        definitions,
        resolved: HashMap::new(),
        in_progress: Vec::new(),
        deepest: 0,
        functions,
        options,
    };
    let root = resolver.block(&ast.root, &mut Referenceables::default())?;
    let declared: Vec<_> = resolver
        .definitions
        .iter()
        .map(|(name, definition)| (*name, definition.span))
        .collect();
    let mut definitions = IndexMap::with_capacity(declared.len());
    for (name, span) in declared {
        definitions.insert(name.to_owned(), resolver.definition(name, span)?);
    }
    Ok(Resolution { root, definitions })
}

fn collect_definitions<'code>(
    body: &'code Body,
    definitions: &mut IndexMap<&'code str, Definition<'code>>,
) -> Result<(), ParseError> {
    for Spanned { span, node } in body {
        match node {
            Node::Define { name, body } => {
                if definitions.contains_key(name.as_str()) {
                    return Err(ParseError::new(
                        ParseErrorKind::DuplicateDefinition(name.clone()),
                        *span,
                    ));
                }
                definitions.insert(name.as_str(), Definition { body, span: *span });
                collect_definitions(body, definitions)?;
            }
            Node::Conditional {
                then_body: body,
                else_body,
                ..
            }
            | Node::Iteration {
                item_body: body,
                else_body,
                ..
            }
            | Node::Scope { body, else_body, .. } => {
                collect_definitions(body, definitions)?;
                if let Some(else_body) = else_body {
                    collect_definitions(else_body, definitions)?;
                }
            }
            Node::Literal(_) | Node::Interpolation(_) | Node::Invoke { .. } => {}
        }
    }
    Ok(())
}

struct TemplateResolver<'code, 'a> {
    definitions: IndexMap<&'code str, Definition<'code>>,
    // Resolved definitions with the length of their longest inclusion chain.
    resolved: HashMap<&'code str, (Arc<ResolvedBlock>, usize)>,
    // Definitions currently being resolved, outermost first.
    in_progress: Vec<&'code str>,
    // Deepest inclusion reached while resolving the current definition.
    deepest: usize,
    functions: &'a Functions,
    options: &'a CompileOptions,
}

impl<'code> TemplateResolver<'code, '_> {
    fn definition(&mut self, name: &'code str, span: Span) -> Result<Arc<ResolvedBlock>, ParseError> {
        if let Some((block, height)) = self.resolved.get(name) {
            let block = Arc::clone(block);
            let depth = self.in_progress.len() + height;
            self.check_depth(depth, span)?;
            self.deepest = self.deepest.max(depth);
            return Ok(block);
        }
        if let Some(start) = self.in_progress.iter().position(|open| *open == name) {
            let mut cycle: Vec<String> = self.in_progress[start..]
                .iter()
                .map(|open| (*open).to_owned())
                .collect();
            cycle.push(name.to_owned());
            return Err(ParseError::new(ParseErrorKind::CyclicTemplate(cycle), span));
        }
        let depth = self.in_progress.len() + 1;
        self.check_depth(depth, span)?;
        let definition = self
            .definitions
            .get(name)
            .copied()
            .ok_or_else(|| ParseError::new(ParseErrorKind::UnknownTemplate(name.to_owned()), span))?;
        trace!("resolving template `{name}`");
        let outer = std::mem::replace(&mut self.deepest, depth);
        self.in_progress.push(name);
        // A definition sees none of its caller's variables.
        let block = self.block(definition.body, &mut Referenceables::default());
        self.in_progress.pop();
        let block = Arc::new(block?);
        let height = self.deepest + 1 - depth;
        self.deepest = outer.max(self.deepest);
        self.resolved.insert(name, (Arc::clone(&block), height));
        Ok(block)
    }

    fn check_depth(&self, depth: usize, span: Span) -> Result<(), ParseError> {
        if depth > self.options.max_include_depth {
            return Err(ParseError::new(
                ParseErrorKind::IncludeDepthExceeded(self.options.max_include_depth),
                span,
            ));
        }
        Ok(())
    }

    fn block(
        &mut self,
        body: &'code Body,
        scope: &mut Referenceables<'code>,
    ) -> Result<ResolvedBlock, ParseError> {
        let level = scope.level();
        let mut nodes = Vec::with_capacity(body.len());
        for Spanned { span, node } in body {
            let span = *span;
            let resolved = match node {
                Node::Literal(text) => ResolvedNode::Literal(text.clone()),
                Node::Interpolation(pipeline) => {
                    self.pipeline(pipeline, scope, span)?;
                    let pipeline = pipeline.clone();
                    match pipeline.declarations {
                        Some(_) => ResolvedNode::Binding { pipeline, span },
                        None => ResolvedNode::Interpolation { pipeline, span },
                    }
                }
                Node::Conditional {
                    condition,
                    then_body,
                    else_body,
                } => {
                    let level = scope.level();
                    self.pipeline(condition, scope, span)?;
                    let then_body = self.block(then_body, scope)?;
                    let else_body = self.optional_block(else_body.as_ref(), scope)?;
                    scope.truncate(level);
                    ResolvedNode::Conditional {
                        condition: condition.clone(),
                        then_body,
                        else_body,
                        span,
                    }
                }
                Node::Iteration {
                    collection,
                    item_body,
                    else_body,
                } => {
                    self.commands(&collection.commands, scope, span)?;
                    let level = scope.level();
                    if let Some(declarations) = &collection.declarations {
                        for variable in &declarations.variables {
                            scope.declare(variable);
                        }
                    }
                    let item_body = self.block(item_body, scope)?;
                    scope.truncate(level);
                    let else_body = self.optional_block(else_body.as_ref(), scope)?;
                    ResolvedNode::Iteration {
                        collection: collection.clone(),
                        item_body,
                        else_body,
                        span,
                    }
                }
                Node::Scope {
                    value,
                    body,
                    else_body,
                } => {
                    let level = scope.level();
                    self.pipeline(value, scope, span)?;
                    let body = self.block(body, scope)?;
                    let else_body = self.optional_block(else_body.as_ref(), scope)?;
                    scope.truncate(level);
                    ResolvedNode::Scope {
                        value: value.clone(),
                        body,
                        else_body,
                        span,
                    }
                }
                Node::Define { .. } => continue,
                Node::Invoke { name, argument } => {
                    if let Some(argument) = argument {
                        self.pipeline(argument, scope, span)?;
                    }
                    let body = self.definition(name, span)?;
                    ResolvedNode::Include {
                        name: name.clone(),
                        argument: argument.clone(),
                        body,
                        span,
                    }
                }
            };
            nodes.push(resolved);
        }
        scope.truncate(level);
        Ok(ResolvedBlock::new(nodes))
    }

    fn optional_block(
        &mut self,
        body: Option<&'code Body>,
        scope: &mut Referenceables<'code>,
    ) -> Result<Option<ResolvedBlock>, ParseError> {
        body.map(|body| self.block(body, scope)).transpose()
    }

    fn pipeline(
        &self,
        pipeline: &'code Pipeline,
        scope: &mut Referenceables<'code>,
        span: Span,
    ) -> Result<(), ParseError> {
        self.commands(&pipeline.commands, scope, span)?;
        let Some(declarations) = &pipeline.declarations else {
            return Ok(());
        };
        if declarations.variables.len() > 1 {
            return Err(ParseError::new(
                ParseErrorKind::Syntax("too many declarations in command".to_owned()),
                span,
            ));
        }
        for variable in &declarations.variables {
            match declarations.kind {
                BindingKind::Declare => scope.declare(variable),
                BindingKind::Assign if scope.contains(variable) => {}
                BindingKind::Assign => {
                    return Err(ParseError::new(
                        ParseErrorKind::UndefinedVariable(variable.clone()),
                        span,
                    ));
                }
            }
        }
        Ok(())
    }

    fn commands(
        &self,
        commands: &[Command],
        scope: &Referenceables<'code>,
        span: Span,
    ) -> Result<(), ParseError> {
        for command in commands {
            match command {
                Command::Call {
                    function,
                    arguments,
                } => {
                    self.function(function, span)?;
                    for argument in arguments {
                        self.operand(argument, scope, span)?;
                    }
                }
                Command::Operand(operand) => self.operand(operand, scope, span)?,
            }
        }
        Ok(())
    }

    fn operand(&self, operand: &Operand, scope: &Referenceables<'code>, span: Span) -> Result<(), ParseError> {
        match operand {
            Operand::Function(name) => self.function(name, span),
            Operand::Variable { name, .. } if !name.is_empty() && !scope.contains(name) => Err(
                ParseError::new(ParseErrorKind::UndefinedVariable(name.clone()), span),
            ),
            Operand::Pipeline(pipeline) => self.commands(&pipeline.commands, scope, span),
            Operand::Dot | Operand::Field(_) | Operand::Variable { .. } | Operand::Literal(_) => Ok(()),
        }
    }

    fn function(&self, name: &str, span: Span) -> Result<(), ParseError> {
        if self.functions.contains(name) {
            Ok(())
        } else {
            Err(ParseError::new(ParseErrorKind::UnknownFunction(name.to_owned()), span))
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::error::ParseErrorKind;
    use crate::options::CompileOptions;
    use crate::template::{ResolvedNode, Template};
    use crate::Functions;

    fn error_kind(source: &str) -> ParseErrorKind {
        Template::compile(source).unwrap_err().kind
    }

    #[test]
    fn invocations_include_the_definition_body() {
        let template = Template::compile(r#"{{template "later" .}}{{define "later"}}x{{.}}{{end}}"#).unwrap();
        let [ResolvedNode::Include { name, body, .. }] = template.root().nodes() else {
            panic!("expected a single include");
        };
        assert_eq!(name, "later");
        assert_eq!(body.layout().slot_count(), 1);
    }

    #[test]
    fn definitions_are_resolved_once() {
        let template = Template::compile(
            r#"{{define "a"}}A{{end}}{{template "a"}}{{template "a"}}"#,
        )
        .unwrap();
        let [
            ResolvedNode::Include { body: first, .. },
            ResolvedNode::Include { body: second, .. },
        ] = template.root().nodes()
        else {
            panic!("expected two includes");
        };
        assert!(std::sync::Arc::ptr_eq(first, second));
    }

    #[test]
    fn unknown_and_duplicate_templates() {
        assert_eq!(
            error_kind(r#"{{template "missing"}}"#),
            ParseErrorKind::UnknownTemplate("missing".to_owned())
        );
        assert_eq!(
            error_kind(r#"{{define "a"}}{{end}}{{define "a"}}{{end}}"#),
            ParseErrorKind::DuplicateDefinition("a".to_owned())
        );
        assert!(matches!(
            error_kind(r#"{{define "a"}}{{end}}{{block "a" .}}{{end}}"#),
            ParseErrorKind::DuplicateDefinition(_)
        ));
    }

    #[test]
    fn cycles_are_rejected() {
        assert_eq!(
            error_kind(r#"{{define "a"}}{{template "a"}}{{end}}"#),
            ParseErrorKind::CyclicTemplate(vec!["a".to_owned(), "a".to_owned()])
        );
        assert_eq!(
            error_kind(
                r#"{{define "a"}}{{template "b"}}{{end}}{{define "b"}}{{template "c"}}{{end}}{{define "c"}}{{template "a"}}{{end}}{{template "a"}}"#
            ),
            ParseErrorKind::CyclicTemplate(
                ["a", "b", "c", "a"].map(str::to_owned).to_vec()
            )
        );
    }

    #[test]
    fn include_depth_is_capped() {
        let source = r#"{{define "a"}}{{template "b"}}{{end}}{{define "b"}}{{template "c"}}{{end}}{{define "c"}}c{{end}}{{template "a"}}"#;
        let options = CompileOptions {
            max_include_depth: 2,
        };
        let error = Template::compile_with(source, &options, Default::default()).unwrap_err();
        assert_eq!(error.kind, ParseErrorKind::IncludeDepthExceeded(2));
        let options = CompileOptions {
            max_include_depth: 3,
        };
        assert!(Template::compile_with(source, &options, crate::Functions::default()).is_ok());

        // Reaching an already resolved definition through a longer chain.
        let source = r#"{{define "a"}}{{template "b"}}{{end}}{{define "b"}}{{template "c"}}{{end}}{{define "c"}}c{{end}}{{template "c"}}{{template "b"}}{{template "a"}}"#;
        let options = CompileOptions {
            max_include_depth: 2,
        };
        let error = Template::compile_with(source, &options, crate::Functions::default()).unwrap_err();
        assert_eq!(error.kind, ParseErrorKind::IncludeDepthExceeded(2));
    }

    #[test]
    fn functions_must_exist() {
        assert_eq!(
            error_kind("{{.A | shout}}"),
            ParseErrorKind::UnknownFunction("shout".to_owned())
        );
        assert_eq!(
            error_kind("{{if (nope .A)}}{{end}}"),
            ParseErrorKind::UnknownFunction("nope".to_owned())
        );
        let mut functions = Functions::default();
        functions.register("shout", |_| Ok(crate::Value::Null));
        assert!(Template::compile_with("{{.A | shout}}", &CompileOptions::default(), functions).is_ok());
    }

    #[test]
    fn variables_are_scoped_to_their_block() {
        assert!(Template::compile("{{$x := 1}}{{if .A}}{{$x = 2}}{{$x}}{{end}}{{$x}}").is_ok());
        assert!(Template::compile("{{range $i, $v := .}}{{$i}}{{$v}}{{end}}").is_ok());
        assert!(Template::compile("{{with $y := .A}}{{$y}}{{else}}{{$y}}{{end}}").is_ok());
        assert!(Template::compile("{{$.Title}}{{$}}").is_ok());
        assert_eq!(
            error_kind("{{if .A}}{{$x := 1}}{{end}}{{$x}}"),
            ParseErrorKind::UndefinedVariable("x".to_owned())
        );
        assert_eq!(
            error_kind("{{range $v := .}}{{end}}{{$v}}"),
            ParseErrorKind::UndefinedVariable("v".to_owned())
        );
        assert_eq!(
            error_kind("{{$x = 1}}"),
            ParseErrorKind::UndefinedVariable("x".to_owned())
        );
        assert_eq!(
            error_kind(r#"{{$x := 1}}{{define "d"}}{{$x}}{{end}}"#),
            ParseErrorKind::UndefinedVariable("x".to_owned())
        );
    }

    #[test]
    fn unused_definitions_are_still_checked() {
        assert_eq!(
            error_kind(r#"{{define "unused"}}{{bogus}}{{end}}"#),
            ParseErrorKind::UnknownFunction("bogus".to_owned())
        );
    }
}
