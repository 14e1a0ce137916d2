//! Expression evaluation shared by the tree compiler and the text executor.

mod functions;

pub use functions::{Function, FunctionError, Functions};

use crate::error::{EvaluationError, EvaluationErrorKind};
use crate::parser::{BindingKind, Command, Declarations, Literal, Operand, Pipeline, Span};
use crate::value::Value;
use std::mem;

/// Variables and function table visible while applying a template to data.
pub(crate) struct Context<'a> {
    root: &'a Value,
    variables: Vec<(String, Value)>,
    functions: &'a Functions,
}

impl<'a> Context<'a> {
    pub fn new(root: &'a Value, functions: &'a Functions) -> Self {
        Self {
            root,
            variables: Vec::new(),
            functions,
        }
    }

    pub fn mark(&self) -> usize {
        self.variables.len()
    }

    pub fn truncate(&mut self, level: usize) {
        self.variables.truncate(level);
    }

    pub fn declare(&mut self, name: &str, value: Value) {
        self.variables.push((name.to_owned(), value));
    }

    pub fn assign(&mut self, name: &str, value: Value, span: Span) -> Result<(), EvaluationError> {
        match self.variables.iter_mut().rev().find(|(declared, _)| declared == name) {
            Some((_, slot)) => {
                *slot = value;
                Ok(())
            }
            None => Err(EvaluationError::new(
                EvaluationErrorKind::UndefinedVariable(name.to_owned()),
                span,
            )),
        }
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables
            .iter()
            .rev()
            .find(|(declared, _)| declared == name)
            .map(|(_, value)| value)
    }

    /// Runs `f` with no variables in scope, as an included template does.
    pub fn isolated<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let outer = mem::take(&mut self.variables);
        let result = f(self);
        self.variables = outer;
        result
    }

    /// Evaluates `pipeline` and performs its declarations, if any.
    pub fn pipeline(&mut self, pipeline: &Pipeline, dot: &Value, span: Span) -> Result<Value, EvaluationError> {
        let value = self.value_of(pipeline, dot, span)?;
        if let Some(Declarations { kind, variables }) = &pipeline.declarations {
            for variable in variables {
                match kind {
                    BindingKind::Declare => self.declare(variable, value.clone()),
                    BindingKind::Assign => self.assign(variable, value.clone(), span)?,
                }
            }
        }
        Ok(value)
    }

    /// Binds the variables of a `range` action for one item: `$v` gets the
    /// item, `$k, $v` get the key and the item.
    pub fn bind_iteration(&mut self, declarations: Option<&Declarations>, key: Value, item: &Value) {
        match declarations.map(|declarations| declarations.variables.as_slice()) {
            Some([value]) => self.declare(value, item.clone()),
            Some([index, value, ..]) => {
                self.declare(index, key);
                self.declare(value, item.clone());
            }
            _ => {}
        }
    }

    /// Evaluates the commands of `pipeline` without performing declarations.
    pub fn value_of(&self, pipeline: &Pipeline, dot: &Value, span: Span) -> Result<Value, EvaluationError> {
        let mut piped = None;
        for command in &pipeline.commands {
            piped = Some(self.command(command, dot, piped, span)?);
        }
        Ok(piped.unwrap_or_default())
    }

    fn command(
        &self,
        command: &Command,
        dot: &Value,
        piped: Option<Value>,
        span: Span,
    ) -> Result<Value, EvaluationError> {
        match command {
            Command::Call {
                function,
                arguments,
            } => self.call(function, arguments, dot, piped, span),
            Command::Operand(Operand::Function(function)) => self.call(function, &[], dot, piped, span),
            Command::Operand(operand) => match piped {
                Some(_) => Err(EvaluationError::new(
                    EvaluationErrorKind::NotCallable(describe(operand)),
                    span,
                )),
                None => self.operand(operand, dot, span),
            },
        }
    }

    fn call(
        &self,
        name: &str,
        arguments: &[Operand],
        dot: &Value,
        piped: Option<Value>,
        span: Span,
    ) -> Result<Value, EvaluationError> {
        let stop_at = match name {
            "and" => Some(false),
            "or" => Some(true),
            _ => None,
        };
        if let Some(stop_at) = stop_at {
            return self.short_circuit(name, stop_at, arguments, dot, piped, span);
        }
        let function = self.functions.get(name).ok_or_else(|| {
            EvaluationError::new(EvaluationErrorKind::UnknownFunction(name.to_owned()), span)
        })?;
        let mut values = arguments
            .iter()
            .map(|argument| self.operand(argument, dot, span))
            .collect::<Result<Vec<_>, _>>()?;
        values.extend(piped);
        function(&values).map_err(|error| {
            let kind = match error {
                FunctionError::Arity { expected, found } => EvaluationErrorKind::ArgumentCount {
                    name: name.to_owned(),
                    expected: expected.to_owned(),
                    found,
                },
                FunctionError::Invalid(message) => EvaluationErrorKind::Function {
                    name: name.to_owned(),
                    message,
                },
            };
            EvaluationError::new(kind, span)
        })
    }

    // `and` stops at the first falsy operand, `or` at the first truthy one.
    // Operands after the deciding one are never evaluated.
    fn short_circuit(
        &self,
        name: &str,
        stop_at: bool,
        arguments: &[Operand],
        dot: &Value,
        piped: Option<Value>,
        span: Span,
    ) -> Result<Value, EvaluationError> {
        if arguments.is_empty() && piped.is_none() {
            return Err(EvaluationError::new(
                EvaluationErrorKind::ArgumentCount {
                    name: name.to_owned(),
                    expected: "at least 1".to_owned(),
                    found: 0,
                },
                span,
            ));
        }
        let mut last = Value::Null;
        for argument in arguments {
            let value = self.operand(argument, dot, span)?;
            if value.is_truthy() == stop_at {
                return Ok(value);
            }
            last = value;
        }
        Ok(piped.unwrap_or(last))
    }

    fn operand(&self, operand: &Operand, dot: &Value, span: Span) -> Result<Value, EvaluationError> {
        match operand {
            Operand::Dot => Ok(dot.clone()),
            Operand::Field(path) => field_chain(dot, path, span),
            Operand::Variable { name, path } if name.is_empty() => field_chain(self.root, path, span),
            Operand::Variable { name, path } => {
                let value = self.variable(name).ok_or_else(|| {
                    EvaluationError::new(EvaluationErrorKind::UndefinedVariable(name.clone()), span)
                })?;
                field_chain(value, path, span)
            }
            Operand::Literal(literal) => Ok(match literal {
                Literal::Nil => Value::Null,
                Literal::Bool(value) => Value::Bool(*value),
                Literal::Int(value) => Value::Int(*value),
                Literal::Float(value) => Value::Float(*value),
                Literal::String(value) => Value::string(value.as_str()),
            }),
            Operand::Function(name) => self.call(name, &[], dot, None, span),
            Operand::Pipeline(pipeline) => self.value_of(pipeline, dot, span),
        }
    }

    /// Key/item pairs a `range` action walks over.
    pub fn iterate(&self, collection: &Value, span: Span) -> Result<Vec<(Value, Value)>, EvaluationError> {
        match collection {
            Value::Null => Ok(Vec::new()),
            Value::List(items) => Ok(items
                .iter()
                .enumerate()
                .map(|(index, item)| (Value::Int(index as i64), item.clone()))
                .collect()),
            Value::Map(_) => Ok(collection
                .sorted_entries()
                .unwrap_or_default()
                .into_iter()
                .map(|(key, item)| (Value::string(key), item.clone()))
                .collect()),
            Value::Int(count) => Ok((0..(*count).max(0))
                .map(|index| (Value::Int(index), Value::Int(index)))
                .collect()),
            other => Err(EvaluationError::new(
                EvaluationErrorKind::CannotIterate(other.type_name()),
                span,
            )),
        }
    }
}

fn field_chain(value: &Value, path: &[String], span: Span) -> Result<Value, EvaluationError> {
    let mut current = value;
    for field in path {
        current = match current {
            Value::Map(entries) => entries.get(field.as_str()).ok_or_else(|| {
                EvaluationError::new(EvaluationErrorKind::MissingField(field.clone()), span)
            })?,
            other => {
                return Err(EvaluationError::new(
                    EvaluationErrorKind::NotAMap {
                        field: field.clone(),
                        found: other.type_name(),
                    },
                    span,
                ));
            }
        };
    }
    Ok(current.clone())
}

fn describe(operand: &Operand) -> String {
    match operand {
        Operand::Dot => ".".to_owned(),
        Operand::Field(path) => format!(".{}", path.join(".")),
        Operand::Variable { name, path } => {
            let mut text = format!("${name}");
            for field in path {
                text.push('.');
                text.push_str(field);
            }
            text
        }
        Operand::Literal(Literal::Nil) => "nil".to_owned(),
        Operand::Literal(Literal::Bool(value)) => value.to_string(),
        Operand::Literal(Literal::Int(value)) => value.to_string(),
        Operand::Literal(Literal::Float(value)) => value.to_string(),
        Operand::Literal(Literal::String(value)) => format!("{value:?}"),
        Operand::Function(name) => name.clone(),
        Operand::Pipeline(_) => "(pipeline)".to_owned(),
    }
}
