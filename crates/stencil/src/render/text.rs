use crate::error::EvaluationError;
use crate::eval::Context;
use crate::template::{ResolvedBlock, ResolvedNode, Template};
use crate::value::Value;

pub(crate) fn execute(template: &Template, data: &Value) -> Result<String, EvaluationError> {
    let mut context = Context::new(data, template.functions());
    let mut output = String::with_capacity(template.source().len());
    write_block(template.root(), data, &mut context, &mut output)?;
    Ok(output)
}

fn write_block(
    block: &ResolvedBlock,
    dot: &Value,
    context: &mut Context,
    output: &mut String,
) -> Result<(), EvaluationError> {
    let level = context.mark();
    let written = write_nodes(block, dot, context, output);
    context.truncate(level);
    written
}

fn write_nodes(
    block: &ResolvedBlock,
    dot: &Value,
    context: &mut Context,
    output: &mut String,
) -> Result<(), EvaluationError> {
    for node in block.nodes() {
        match node {
            ResolvedNode::Literal(text) => output.push_str(text),
            ResolvedNode::Binding { pipeline, span } => {
                context.pipeline(pipeline, dot, *span)?;
            }
            ResolvedNode::Interpolation { pipeline, span } => {
                output.push_str(&context.pipeline(pipeline, dot, *span)?.to_string());
            }
            ResolvedNode::Conditional {
                condition,
                then_body,
                else_body,
                span,
            } => {
                let level = context.mark();
                let written = match context.pipeline(condition, dot, *span)?.is_truthy() {
                    true => write_block(then_body, dot, context, output),
                    false => match else_body {
                        Some(else_body) => write_block(else_body, dot, context, output),
                        None => Ok(()),
                    },
                };
                context.truncate(level);
                written?;
            }
            ResolvedNode::Scope {
                value,
                body,
                else_body,
                span,
            } => {
                let level = context.mark();
                let value = context.pipeline(value, dot, *span)?;
                let written = match (value.is_truthy(), else_body) {
                    (true, _) => write_block(body, &value, context, output),
                    (false, Some(else_body)) => write_block(else_body, dot, context, output),
                    (false, None) => Ok(()),
                };
                context.truncate(level);
                written?;
            }
            ResolvedNode::Iteration {
                collection,
                item_body,
                else_body,
                span,
            } => {
                let value = context.value_of(collection, dot, *span)?;
                let entries = context.iterate(&value, *span)?;
                if entries.is_empty() {
                    if let Some(else_body) = else_body {
                        write_block(else_body, dot, context, output)?;
                    }
                    continue;
                }
                for (key, item) in entries {
                    let level = context.mark();
                    context.bind_iteration(collection.declarations.as_ref(), key, &item);
                    let written = write_block(item_body, &item, context, output);
                    context.truncate(level);
                    written?;
                }
            }
            ResolvedNode::Include {
                argument,
                body,
                span,
                ..
            } => {
                let argument = match argument {
                    Some(argument) => context.pipeline(argument, dot, *span)?,
                    None => Value::Null,
                };
                context.isolated(|context| write_block(body, &argument, context, output))?;
            }
        }
    }
    Ok(())
}
