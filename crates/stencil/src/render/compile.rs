use super::tree::{Comprehension, Dynamic, RenderTree};
use crate::error::EvaluationError;
use crate::eval::Context;
use crate::template::{ResolvedBlock, ResolvedNode, Template};
use crate::value::Value;

pub(crate) fn compile(template: &Template, data: &Value) -> Result<RenderTree, EvaluationError> {
    let mut context = Context::new(data, template.functions());
    let tree = compile_block(template.root(), data, &mut context)?;
    debug_assert!(
        tree.validate().is_ok(),
        "render tree breaks the statics invariant: {:?}",
        tree.validate()
    );
    Ok(tree)
}

fn compile_block(block: &ResolvedBlock, dot: &Value, context: &mut Context) -> Result<RenderTree, EvaluationError> {
    let level = context.mark();
    let dynamics = fill(block, dot, context);
    context.truncate(level);
    Ok(RenderTree::new(block.layout().statics().clone(), dynamics?))
}

/// Evaluates the dynamic nodes of `block` in slot order.
fn fill(block: &ResolvedBlock, dot: &Value, context: &mut Context) -> Result<Vec<Dynamic>, EvaluationError> {
    let mut dynamics = Vec::with_capacity(block.layout().slot_count());
    for node in block.nodes() {
        let dynamic = match node {
            ResolvedNode::Literal(_) => continue,
            ResolvedNode::Binding { pipeline, span } => {
                context.pipeline(pipeline, dot, *span)?;
                continue;
            }
            ResolvedNode::Interpolation { pipeline, span } => {
                Dynamic::Text(context.pipeline(pipeline, dot, *span)?.to_string())
            }
            ResolvedNode::Conditional {
                condition,
                then_body,
                else_body,
                span,
            } => {
                let level = context.mark();
                let taken = match context.pipeline(condition, dot, *span)?.is_truthy() {
                    true => Some(then_body),
                    false => else_body.as_ref(),
                };
                let dynamic = match taken {
                    Some(body) => Dynamic::Tree(compile_block(body, dot, context)?),
                    None => Dynamic::Nil,
                };
                context.truncate(level);
                dynamic
            }
            ResolvedNode::Scope {
                value,
                body,
                else_body,
                span,
            } => {
                let level = context.mark();
                let value = context.pipeline(value, dot, *span)?;
                let dynamic = if value.is_truthy() {
                    Dynamic::Tree(compile_block(body, &value, context)?)
                } else if let Some(else_body) = else_body {
                    Dynamic::Tree(compile_block(else_body, dot, context)?)
                } else {
                    Dynamic::Nil
                };
                context.truncate(level);
                dynamic
            }
            ResolvedNode::Iteration {
                collection,
                item_body,
                else_body,
                span,
            } => {
                let value = context.value_of(collection, dot, *span)?;
                let entries = context.iterate(&value, *span)?;
                match else_body {
                    Some(else_body) if entries.is_empty() => Dynamic::Tree(compile_block(else_body, dot, context)?),
                    _ => {
                        let mut items = Vec::with_capacity(entries.len());
                        for (key, item) in entries {
                            let level = context.mark();
                            context.bind_iteration(collection.declarations.as_ref(), key, &item);
                            let slots = fill(item_body, &item, context);
                            context.truncate(level);
                            items.push(slots?);
                        }
                        Dynamic::Comprehension(Comprehension::new(item_body.layout().statics().clone(), items))
                    }
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
                Dynamic::Tree(context.isolated(|context| compile_block(body, &argument, context))?)
            }
        };
        dynamics.push(dynamic);
    }
    Ok(dynamics)
}

#[cfg(test)]
mod tests {
    use crate::render::Dynamic;
    use crate::{Template, Value};
    use serde_json::json;

    fn render(source: &str, data: serde_json::Value) -> crate::RenderTree {
        Template::compile(source).unwrap().render(&Value::from(data)).unwrap()
    }

    #[test]
    fn branches_always_occupy_their_slot() {
        let source = "a{{if .On}}<b>{{.X}}</b>{{end}}c{{.Y}}";
        let on = render(source, json!({"On": true, "X": "x", "Y": "y"}));
        let off = render(source, json!({"On": false, "X": "x", "Y": "y"}));
        assert_eq!(on.dynamics().len(), 2);
        assert_eq!(off.dynamics().len(), 2);
        assert_eq!(off.dynamics()[0], Dynamic::Nil);
        assert_eq!(off.dynamics()[1], on.dynamics()[1]);
        assert_eq!(on.render(), "a<b>x</b>cy");
        assert_eq!(off.render(), "acy");
    }

    #[test]
    fn items_share_one_statics_allocation() {
        let tree = render("{{range .}}<li>{{.}}</li>{{end}}", json!(["a", "b", "c"]));
        let Dynamic::Comprehension(list) = &tree.dynamics()[0] else {
            panic!("expected a comprehension");
        };
        assert_eq!(list.len(), 3);
        let again = render("{{range .}}<li>{{.}}</li>{{end}}", json!([]));
        let Dynamic::Comprehension(empty) = &again.dynamics()[0] else {
            panic!("expected a comprehension");
        };
        assert!(empty.is_empty());
        assert_eq!(empty.statics(), list.statics());
    }

    #[test]
    fn empty_ranges_fall_back_to_else() {
        let tree = render("{{range .}}{{.}}{{else}}none{{end}}", json!([]));
        assert!(matches!(&tree.dynamics()[0], Dynamic::Tree(_)));
        assert_eq!(tree.render(), "none");
    }

    #[test]
    fn includes_see_only_their_argument_and_the_root() {
        let tree = render(
            r#"{{define "card"}}[{{.Name}} of {{$.Team}}]{{end}}{{$x := 1}}{{range .People}}{{template "card" .}}{{end}}"#,
            json!({"Team": "core", "People": [{"Name": "ann"}, {"Name": "bo"}]}),
        );
        assert_eq!(tree.render(), "[ann of core][bo of core]");
    }

    #[test]
    fn evaluation_errors_abort_the_render() {
        let template = Template::compile("{{if .A}}{{.Missing}}{{end}}").unwrap();
        assert!(template.render(&Value::from(json!({"A": true}))).is_err());
        assert!(template.render(&Value::from(json!({"A": false}))).is_ok());
    }
}
