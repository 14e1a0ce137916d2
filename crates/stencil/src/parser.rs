use crate::error::{ParseError, ParseErrorKind};
use chumsky::prelude::*;
use std::fmt;
use std::ops::Range;

mod expression;
mod lexer;
mod source;
mod template_resolver;

pub use expression::pipeline_parser;
pub use lexer::{Token, lexer};
pub use source::{SourceCode, StrSlice};
pub(crate) use template_resolver::{Resolution, resolve};

pub type SyntaxError<'code, T> = Rich<'code, T, SimpleSpan>;

/// Byte range into the template source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn into_range(self) -> Range<usize> {
        self.start..self.end
    }

    pub fn to(self, other: Span) -> Self {
        Self::new(self.start, other.end)
    }
}

impl From<Range<usize>> for Span {
    fn from(range: Range<usize>) -> Self {
        Self::new(range.start, range.end)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub span: Span,
    pub node: T,
}

pub type Body = Vec<Spanned<Node>>;

#[derive(Debug, Clone)]
pub struct Ast {
    pub source: SourceCode,
    pub root: Body,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Literal(StrSlice),
    Interpolation(Pipeline),
    Conditional {
        condition: Pipeline,
        then_body: Body,
        else_body: Option<Body>,
    },
    Iteration {
        collection: Pipeline,
        item_body: Body,
        else_body: Option<Body>,
    },
    Scope {
        value: Pipeline,
        body: Body,
        else_body: Option<Body>,
    },
    Define {
        name: String,
        body: Body,
    },
    Invoke {
        name: String,
        argument: Option<Pipeline>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    pub declarations: Option<Declarations>,
    pub commands: Vec<Command>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Declarations {
    pub kind: BindingKind,
    pub variables: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    Declare,
    Assign,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Call {
        function: String,
        arguments: Vec<Operand>,
    },
    Operand(Operand),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Dot,
    Field(Vec<String>),
    // An empty name is `$`, the top-level data.
    Variable { name: String, path: Vec<String> },
    Literal(Literal),
    Function(String),
    Pipeline(Box<Pipeline>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

/// Block-opening actions that need a matching `{{end}}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Construct {
    If,
    Range,
    With,
    Define,
    Block,
}

impl fmt::Display for Construct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::If => "if",
            Self::Range => "range",
            Self::With => "with",
            Self::Define => "define",
            Self::Block => "block",
        })
    }
}

/// Splits template source into literal text and actions and nests the
/// actions into a syntax tree.
pub fn parse(source: &SourceCode) -> Result<Ast, ParseError> {
    let text = source.as_str();
    let bytes = text.as_bytes();
    let mut builder = TreeBuilder::default();
    let mut cursor = 0;
    let mut trim_next = false;
    while let Some(open) = find_action_start(bytes, cursor) {
        let close = find_action_end(bytes, open + 2).ok_or_else(|| {
            let kind = if comment_start(bytes, open + 2).is_some() {
                ParseErrorKind::UnclosedComment
            } else {
                ParseErrorKind::UnclosedAction
            };
            ParseError::new(kind, open..text.len())
        })?;
        let action = Action::new(text, open, close);
        builder.literal(source, cursor..open, trim_next, action.trim_before);
        trim_next = action.trim_after;
        builder.action(&action)?;
        cursor = close + 2;
    }
    builder.literal(source, cursor..text.len(), trim_next, false);
    builder.finish(source)
}

struct Action<'code> {
    span: Span,
    body: &'code str,
    offset: usize,
    trim_before: bool,
    trim_after: bool,
}

impl<'code> Action<'code> {
    fn new(text: &'code str, open: usize, close: usize) -> Self {
        let bytes = text.as_bytes();
        let mut start = open + 2;
        let mut end = close;
        let trim_before = bytes.get(start) == Some(&b'-')
            && bytes.get(start + 1).is_some_and(u8::is_ascii_whitespace);
        if trim_before {
            start += 1;
        }
        let trim_after =
            end >= start + 2 && bytes[end - 1] == b'-' && bytes[end - 2].is_ascii_whitespace();
        if trim_after {
            end -= 1;
        }
        let raw = &text[start..end];
        let body = raw.trim_start();
        let offset = start + raw.len() - body.len();
        Self {
            span: Span::new(open, close + 2),
            body: body.trim_end(),
            offset,
            trim_before,
            trim_after,
        }
    }

    fn error(&self, kind: ParseErrorKind) -> ParseError {
        ParseError::new(kind, self.span)
    }

    fn error_at(&self, kind: ParseErrorKind, span: SimpleSpan) -> ParseError {
        ParseError::new(kind, span.start + self.offset..span.end + self.offset)
    }

    fn pipeline(
        &self,
        tokens: &[(Token<'_>, SimpleSpan)],
        keyword: &'static str,
    ) -> Result<Pipeline, ParseError> {
        if tokens.is_empty() {
            return Err(self.error(ParseErrorKind::MissingPipeline(keyword)));
        }
        expression::parse_pipeline(tokens, self.body.len(), self.offset)
    }

    fn name<'t>(
        &self,
        tokens: &'t [(Token<'t>, SimpleSpan)],
        keyword: &'static str,
    ) -> Result<(String, &'t [(Token<'t>, SimpleSpan)]), ParseError> {
        let name = match tokens.first() {
            Some((Token::Text(text), span)) => expression::unescape(text)
                .map_err(|message| self.error_at(ParseErrorKind::Syntax(message), *span))?,
            Some((Token::RawText(text), _)) => (*text).to_owned(),
            _ => return Err(self.error(ParseErrorKind::MissingName(keyword))),
        };
        Ok((name, &tokens[1..]))
    }

    fn nothing_after(&self, tokens: &[(Token<'_>, SimpleSpan)], keyword: &str) -> Result<(), ParseError> {
        match tokens.first() {
            Some((token, span)) => Err(self.error_at(
                ParseErrorKind::Syntax(format!("unexpected `{token}` in {keyword}")),
                *span,
            )),
            None => Ok(()),
        }
    }
}

enum Head {
    If(Pipeline),
    Range(Pipeline),
    With(Pipeline),
    Define(String),
    Block(String, Option<Pipeline>),
}

impl Head {
    fn construct(&self) -> Construct {
        match self {
            Self::If(_) => Construct::If,
            Self::Range(_) => Construct::Range,
            Self::With(_) => Construct::With,
            Self::Define(_) => Construct::Define,
            Self::Block(..) => Construct::Block,
        }
    }
}

struct OpenBlock {
    head: Head,
    span: Span,
    body: Body,
    else_body: Option<Body>,
    // Opened by `else if` / `else with`; closed by the same `end` as its parent.
    chained: bool,
}

impl OpenBlock {
    fn new(head: Head, span: Span, chained: bool) -> Self {
        Self {
            head,
            span,
            body: Vec::new(),
            else_body: None,
            chained,
        }
    }

    fn close(self, end: Span) -> Vec<Spanned<Node>> {
        let span = self.span.to(end);
        let Self {
            head,
            body,
            else_body,
            ..
        } = self;
        let node = match head {
            Head::If(condition) => Node::Conditional {
                condition,
                then_body: body,
                else_body,
            },
            Head::Range(collection) => Node::Iteration {
                collection,
                item_body: body,
                else_body,
            },
            Head::With(value) => Node::Scope {
                value,
                body,
                else_body,
            },
            Head::Define(name) => Node::Define { name, body },
            Head::Block(name, argument) => {
                return vec![
                    Spanned {
                        span,
                        node: Node::Define {
                            name: name.clone(),
                            body,
                        },
                    },
                    Spanned {
                        span,
                        node: Node::Invoke { name, argument },
                    },
                ];
            }
        };
        vec![Spanned { span, node }]
    }
}

#[derive(Default)]
struct TreeBuilder {
    root: Body,
    open: Vec<OpenBlock>,
}

impl TreeBuilder {
    fn target(&mut self) -> &mut Body {
        match self.open.last_mut() {
            None => &mut self.root,
            Some(block) => match &mut block.else_body {
                Some(else_body) => else_body,
                None => &mut block.body,
            },
        }
    }

    fn push(&mut self, span: Span, node: Node) {
        self.target().push(Spanned { span, node });
    }

    fn literal(&mut self, source: &SourceCode, range: Range<usize>, trim_start: bool, trim_end: bool) {
        let Some(mut text) = source.slice(range) else {
            return;
        };
        if trim_start {
            text = text.trim_start();
        }
        if trim_end {
            text = text.trim_end();
        }
        if !text.is_empty() {
            self.push(text.range().into(), Node::Literal(text));
        }
    }

    fn action(&mut self, action: &Action<'_>) -> Result<(), ParseError> {
        if action.body.starts_with("/*") {
            if action.body.len() >= 4 && action.body.ends_with("*/") {
                return Ok(());
            }
            return Err(action.error(ParseErrorKind::Syntax(
                "comment ends before closing delimiter".to_owned(),
            )));
        }
        let tokens = lexer().parse(action.body).into_result().map_err(|errors| {
            match errors.into_iter().next() {
                Some(error) => action.error_at(ParseErrorKind::Syntax(error.to_string()), *error.span()),
                None => action.error(ParseErrorKind::Syntax("invalid action".to_owned())),
            }
        })?;
        let Some(&(keyword, _)) = tokens.first() else {
            return Err(action.error(ParseErrorKind::EmptyAction));
        };
        let rest = &tokens[1..];
        match keyword {
            Token::If => {
                let condition = action.pipeline(rest, "if")?;
                self.open.push(OpenBlock::new(Head::If(condition), action.span, false));
            }
            Token::Range => {
                let collection = action.pipeline(rest, "range")?;
                self.open.push(OpenBlock::new(Head::Range(collection), action.span, false));
            }
            Token::With => {
                let value = action.pipeline(rest, "with")?;
                self.open.push(OpenBlock::new(Head::With(value), action.span, false));
            }
            Token::Else => match rest.first() {
                None => self.else_branch(action.span)?,
                Some((Token::If, _)) => {
                    let condition = action.pipeline(&rest[1..], "else if")?;
                    self.else_chain(action.span, Head::If(condition))?;
                }
                Some((Token::With, _)) => {
                    let value = action.pipeline(&rest[1..], "else with")?;
                    self.else_chain(action.span, Head::With(value))?;
                }
                Some(_) => action.nothing_after(rest, "else")?,
            },
            Token::End => {
                action.nothing_after(rest, "end")?;
                self.end(action.span)?;
            }
            Token::Define => {
                let (name, rest) = action.name(rest, "define")?;
                action.nothing_after(rest, "define")?;
                if !self.open.is_empty() {
                    return Err(action.error(ParseErrorKind::NestedDefine));
                }
                self.open.push(OpenBlock::new(Head::Define(name), action.span, false));
            }
            Token::Block => {
                let (name, rest) = action.name(rest, "block")?;
                let argument = (!rest.is_empty())
                    .then(|| action.pipeline(rest, "block"))
                    .transpose()?;
                self.open
                    .push(OpenBlock::new(Head::Block(name, argument), action.span, false));
            }
            Token::Template => {
                let (name, rest) = action.name(rest, "template")?;
                let argument = (!rest.is_empty())
                    .then(|| action.pipeline(rest, "template"))
                    .transpose()?;
                self.push(action.span, Node::Invoke { name, argument });
            }
            _ => {
                let pipeline = expression::parse_pipeline(&tokens, action.body.len(), action.offset)?;
                self.push(action.span, Node::Interpolation(pipeline));
            }
        }
        Ok(())
    }

    fn else_branch(&mut self, span: Span) -> Result<(), ParseError> {
        let block = self
            .open
            .last_mut()
            .ok_or_else(|| ParseError::new(ParseErrorKind::Unexpected("else".to_owned()), span))?;
        let construct = block.head.construct();
        if matches!(construct, Construct::Define | Construct::Block) {
            return Err(ParseError::new(ParseErrorKind::ElseNotAllowed(construct), span));
        }
        if block.else_body.is_some() {
            return Err(ParseError::new(ParseErrorKind::DuplicateElse(construct), span));
        }
        block.else_body = Some(Vec::new());
        Ok(())
    }

    fn else_chain(&mut self, span: Span, head: Head) -> Result<(), ParseError> {
        let construct = head.construct();
        if self.open.last().map(|block| block.head.construct()) != Some(construct) {
            return Err(ParseError::new(
                ParseErrorKind::Unexpected(format!("else {construct}")),
                span,
            ));
        }
        self.else_branch(span)?;
        self.open.push(OpenBlock::new(head, span, true));
        Ok(())
    }

    fn end(&mut self, span: Span) -> Result<(), ParseError> {
        loop {
            let block = self
                .open
                .pop()
                .ok_or_else(|| ParseError::new(ParseErrorKind::Unexpected("end".to_owned()), span))?;
            let chained = block.chained;
            for Spanned { span, node } in block.close(span) {
                self.push(span, node);
            }
            if !chained {
                return Ok(());
            }
        }
    }

    fn finish(self, source: &SourceCode) -> Result<Ast, ParseError> {
        if let Some(block) = self.open.last() {
            return Err(ParseError::new(
                ParseErrorKind::Unterminated(block.head.construct()),
                block.span,
            ));
        }
        Ok(Ast {
            source: source.clone(),
            root: self.root,
        })
    }
}

fn find_action_start(bytes: &[u8], from: usize) -> Option<usize> {
    let mut index = from;
    while index + 1 < bytes.len() {
        if bytes[index] == b'{' && bytes[index + 1] == b'{' {
            return Some(index);
        }
        index += 1;
    }
    None
}

fn comment_start(bytes: &[u8], from: usize) -> Option<usize> {
    let mut index = from;
    if bytes.get(index) == Some(&b'-') && bytes.get(index + 1).is_some_and(u8::is_ascii_whitespace) {
        index += 1;
    }
    while bytes.get(index).is_some_and(u8::is_ascii_whitespace) {
        index += 1;
    }
    bytes
        .get(index..)
        .is_some_and(|rest| rest.starts_with(b"/*"))
        .then_some(index)
}

fn find_action_end(bytes: &[u8], from: usize) -> Option<usize> {
    let mut index = from;
    if let Some(comment) = comment_start(bytes, from) {
        let length = bytes[comment + 2..]
            .windows(2)
            .position(|window| window == b"*/")?;
        index = comment + 2 + length + 2;
    }
    let mut quote = None;
    while index + 1 < bytes.len() {
        let current = bytes[index];
        match quote {
            Some(b'"') if current == b'\\' => {
                index += 2;
                continue;
            }
            Some(open) if current == open => quote = None,
            Some(_) => {}
            None if current == b'"' || current == b'`' => quote = Some(current),
            None if current == b'}' && bytes[index + 1] == b'}' => return Some(index),
            None => {}
        }
        index += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_str(text: &str) -> Result<Ast, ParseError> {
        parse(&SourceCode::new(text))
    }

    fn kinds(body: &Body) -> Vec<&'static str> {
        body.iter()
            .map(|Spanned { node, .. }| match node {
                Node::Literal(_) => "literal",
                Node::Interpolation(_) => "interpolation",
                Node::Conditional { .. } => "if",
                Node::Iteration { .. } => "range",
                Node::Scope { .. } => "with",
                Node::Define { .. } => "define",
                Node::Invoke { .. } => "template",
            })
            .collect()
    }

    fn error_kind(text: &str) -> ParseErrorKind {
        parse_str(text).unwrap_err().kind
    }

    #[test]
    fn splits_text_and_actions() {
        let ast = parse_str("<p>{{.Name}}</p>").unwrap();
        assert_eq!(kinds(&ast.root), vec!["literal", "interpolation", "literal"]);
        assert_eq!(ast.root[1].span, Span::new(3, 12));
        let Node::Literal(text) = &ast.root[2].node else {
            panic!("expected literal");
        };
        assert_eq!(text, "</p>");
    }

    #[test]
    fn nests_blocks() {
        let ast = parse_str("{{range .Items}}{{if .Done}}x{{else}}y{{end}}{{else}}none{{end}}").unwrap();
        let [Spanned { node: Node::Iteration { item_body, else_body, .. }, span }] = ast.root.as_slice() else {
            panic!("expected one range, got {:?}", ast.root);
        };
        assert_eq!(kinds(item_body), vec!["if"]);
        assert_eq!(kinds(else_body.as_ref().unwrap()), vec!["literal"]);
        assert_eq!(span.into_range(), 0..64);
    }

    #[test]
    fn else_if_chains_close_with_one_end() {
        let ast = parse_str("{{if .A}}a{{else if .B}}b{{else}}c{{end}}!").unwrap();
        assert_eq!(kinds(&ast.root), vec!["if", "literal"]);
        let Node::Conditional { else_body, .. } = &ast.root[0].node else {
            panic!("expected if");
        };
        let nested = else_body.as_ref().unwrap();
        assert_eq!(kinds(nested), vec!["if"]);
        let Node::Conditional { else_body, .. } = &nested[0].node else {
            panic!("expected nested if");
        };
        assert_eq!(kinds(else_body.as_ref().unwrap()), vec!["literal"]);
    }

    #[test]
    fn else_with_chains_nest_a_scope() {
        let ast = parse_str("{{with .A}}a{{else with .B}}b{{else}}c{{end}}!").unwrap();
        assert_eq!(kinds(&ast.root), vec!["with", "literal"]);
        let Node::Scope { body, else_body, .. } = &ast.root[0].node else {
            panic!("expected with");
        };
        assert_eq!(kinds(body), vec!["literal"]);
        let nested = else_body.as_ref().unwrap();
        assert_eq!(kinds(nested), vec!["with"]);
        let Node::Scope { value, else_body, .. } = &nested[0].node else {
            panic!("expected nested with");
        };
        assert_eq!(
            value.commands,
            vec![Command::Operand(Operand::Field(vec!["B".to_owned()]))]
        );
        assert_eq!(kinds(else_body.as_ref().unwrap()), vec!["literal"]);
        assert_eq!(
            error_kind("{{if .A}}{{else with .B}}{{end}}"),
            ParseErrorKind::Unexpected("else with".to_owned())
        );
    }

    #[test]
    fn block_defines_and_invokes() {
        let ast = parse_str(r#"{{block "nav" .Links}}<nav/>{{end}}"#).unwrap();
        assert_eq!(kinds(&ast.root), vec!["define", "template"]);
        let Node::Invoke { name, argument } = &ast.root[1].node else {
            panic!("expected invoke");
        };
        assert_eq!(name, "nav");
        assert!(argument.is_some());
    }

    #[test]
    fn trim_markers_eat_whitespace() {
        let ast = parse_str("a \n {{- .X -}} \n b {{-3}}").unwrap();
        let texts: Vec<_> = ast
            .root
            .iter()
            .filter_map(|spanned| match &spanned.node {
                Node::Literal(text) => Some(text.to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["a", "b "]);
        assert_eq!(kinds(&ast.root).len(), 4);
    }

    #[test]
    fn comments_are_dropped() {
        let ast = parse_str("a{{/* {{not}} \" */}}b{{- /* trimmed */ -}} c").unwrap();
        assert_eq!(kinds(&ast.root), vec!["literal", "literal", "literal"]);
        assert_eq!(
            error_kind("{{/* open"),
            ParseErrorKind::UnclosedComment
        );
    }

    #[test]
    fn strings_may_contain_delimiters() {
        let ast = parse_str(r#"{{printf "}}%s" .A}}"#).unwrap();
        assert_eq!(kinds(&ast.root), vec!["interpolation"]);
    }

    #[test]
    fn structural_errors() {
        assert_eq!(error_kind("{{end}}"), ParseErrorKind::Unexpected("end".to_owned()));
        assert_eq!(error_kind("x{{else}}"), ParseErrorKind::Unexpected("else".to_owned()));
        assert_eq!(
            error_kind("{{if .A}}{{else}}{{else}}{{end}}"),
            ParseErrorKind::DuplicateElse(Construct::If)
        );
        assert_eq!(
            error_kind(r#"{{define "a"}}{{else}}{{end}}"#),
            ParseErrorKind::ElseNotAllowed(Construct::Define)
        );
        assert_eq!(
            error_kind("{{range .A}}{{else if .B}}{{end}}"),
            ParseErrorKind::Unexpected("else if".to_owned())
        );
        assert_eq!(
            error_kind(r#"{{if .A}}{{define "x"}}{{end}}{{end}}"#),
            ParseErrorKind::NestedDefine
        );
        assert_eq!(error_kind("{{if}}{{end}}"), ParseErrorKind::MissingPipeline("if"));
        assert_eq!(error_kind("{{template .A}}"), ParseErrorKind::MissingName("template"));
        assert_eq!(error_kind("a {{ }}"), ParseErrorKind::EmptyAction);
        assert!(matches!(error_kind("{{.A )}}"), ParseErrorKind::Syntax(_)));
    }

    #[test]
    fn unterminated_blocks_point_at_the_opener() {
        let error = parse_str("ok {{with .A}}{{if .B}}x{{end}}").unwrap_err();
        assert_eq!(error.kind, ParseErrorKind::Unterminated(Construct::With));
        assert_eq!(error.span, Span::new(3, 14));

        let error = parse_str("<p>{{.Name").unwrap_err();
        assert_eq!(error.kind, ParseErrorKind::UnclosedAction);
        assert_eq!(error.span.start, 3);
    }
}
