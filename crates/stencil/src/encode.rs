//! Turns diff results into wire [`Fragment`]s.
//!
//! Keyed changes below a top-level slot are folded into one
//! `static_dynamic` fragment for that slot. A node that chose markers, list
//! operations or replacement gets a fragment of its own, addressed by its
//! full key path and emitted after the fragment of its top-level slot.

use crate::diff::{ListEdit, RootUpdate, Update};
use crate::keys::KeyPath;
use crate::render::Item;
use log::error;
use serde::Serialize;
use serde_json::{Map, Value as Json};
use stencil_protocol::{Fragment, ITEMS_KEY, ListOp, Strategy};

pub(crate) fn fragments(update: RootUpdate) -> Vec<Fragment> {
    match update {
        RootUpdate::Replace(tree) => vec![Fragment::new("", Strategy::Replacement, to_json(&tree))],
        RootUpdate::Slots(slots) => {
            let mut fragments = Vec::with_capacity(slots.len());
            for (key, update) in &slots {
                let path = KeyPath::root().child(*key);
                let mut deferred = Vec::new();
                if let Some(data) = inline(&path, update, &mut deferred) {
                    fragments.push(Fragment::new(path.to_string(), Strategy::StaticDynamic, data));
                }
                fragments.append(&mut deferred);
            }
            fragments
        }
    }
}

/// JSON of `update` as part of its parent's keyed update, or `None` when
/// it travels in fragments of its own, which are pushed onto `deferred`.
fn inline(path: &KeyPath, update: &Update, deferred: &mut Vec<Fragment>) -> Option<Json> {
    match update {
        Update::Text(text) => Some(Json::String(text.clone())),
        Update::Keyed(children) => {
            let mut object = Map::new();
            for (key, child) in children {
                if let Some(json) = inline(&path.child(*key), child, deferred) {
                    object.insert(key.to_string(), json);
                }
            }
            (!object.is_empty()).then_some(Json::Object(object))
        }
        Update::Items(items) => {
            let changed: Map<String, Json> = items
                .iter()
                .map(|(index, item)| (index.to_string(), to_json(&Item(item))))
                .collect();
            let mut object = Map::new();
            object.insert(ITEMS_KEY.to_owned(), Json::Object(changed));
            Some(Json::Object(object))
        }
        Update::Markers(_) | Update::Granular(_) | Update::Replace(_) => {
            deferred.push(Fragment::new(path.to_string(), update.strategy(), payload(update)));
            None
        }
    }
}

/// Payload of a fragment carrying `update` at its own id.
pub(crate) fn payload(update: &Update) -> Json {
    match update {
        Update::Markers(markers) => to_json(markers),
        Update::Granular(edits) => to_json(&edits.iter().map(list_op).collect::<Vec<_>>()),
        Update::Replace(dynamic) => to_json(dynamic),
        Update::Text(_) | Update::Keyed(_) | Update::Items(_) => {
            inline(&KeyPath::root(), update, &mut Vec::new()).unwrap_or(Json::Object(Map::new()))
        }
    }
}

/// Serialized length of everything sent for `update`, including fragments
/// split off for its descendants.
pub(crate) fn size(update: &Update) -> usize {
    match update {
        Update::Markers(_) | Update::Granular(_) | Update::Replace(_) => measure(&payload(update)),
        Update::Text(_) | Update::Keyed(_) | Update::Items(_) => {
            let mut deferred = Vec::new();
            let inline = inline(&KeyPath::root(), update, &mut deferred).unwrap_or(Json::Object(Map::new()));
            measure(&inline)
                + deferred
                    .iter()
                    .map(|fragment| measure(&fragment.data))
                    .sum::<usize>()
        }
    }
}

fn list_op(edit: &ListEdit) -> ListOp {
    match edit {
        ListEdit::Insert { index, item } => ListOp::Insert {
            index: *index as u32,
            item: to_json(&Item(item)),
        },
        ListEdit::Remove { index } => ListOp::Remove { index: *index as u32 },
        ListEdit::Move { from, to } => ListOp::Move {
            from: *from as u32,
            to: *to as u32,
        },
    }
}

fn measure(json: &Json) -> usize {
    json.to_string().len()
}

pub(crate) fn to_json(value: &impl Serialize) -> Json {
    serde_json::to_value(value).unwrap_or_else(|error| {
        error!("failed to encode wire value: {error}");
        Json::Null
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{SlotKey, Statics};
    use crate::render::{Dynamic, RenderTree};
    use serde_json::json;
    use stencil_protocol::Marker;

    fn text(value: &str) -> Dynamic {
        Dynamic::Text(value.to_owned())
    }

    #[test]
    fn keyed_children_fold_into_one_fragment() {
        let update = RootUpdate::Slots(vec![(
            SlotKey::new(1),
            Update::Keyed(vec![
                (SlotKey::new(0), Update::Text("a".to_owned())),
                (
                    SlotKey::new(2),
                    Update::Keyed(vec![(SlotKey::new(1), Update::Text("b".to_owned()))]),
                ),
                (SlotKey::new(3), Update::Replace(Dynamic::Nil)),
            ]),
        )]);
        let fragments = fragments(update);
        assert_eq!(
            fragments,
            vec![
                Fragment::new("1", Strategy::StaticDynamic, json!({"0": "a", "2": {"1": "b"}})),
                Fragment::new("1.3", Strategy::Replacement, Json::Null),
            ]
        );
    }

    #[test]
    fn special_top_level_updates_keep_their_strategy() {
        let tree = RenderTree::new(Statics::new(["<i>", "</i>"]), vec![text("x")]);
        let fragments = fragments(RootUpdate::Slots(vec![
            (SlotKey::new(0), Update::Markers(vec![Marker(3, "x".to_owned())])),
            (SlotKey::new(1), Update::Replace(Dynamic::Tree(tree))),
            (
                SlotKey::new(2),
                Update::Granular(vec![
                    ListEdit::Remove { index: 0 },
                    ListEdit::Insert {
                        index: 1,
                        item: vec![text("z")],
                    },
                ]),
            ),
        ]));
        assert_eq!(
            fragments,
            vec![
                Fragment::new("0", Strategy::Markers, json!([[3, "x"]])),
                Fragment::new("1", Strategy::Replacement, json!({"s": ["<i>", "</i>"], "0": "x"})),
                Fragment::new(
                    "2",
                    Strategy::Granular,
                    json!([{"op": "remove", "index": 0}, {"op": "insert", "index": 1, "item": {"0": "z"}}])
                ),
            ]
        );
    }

    #[test]
    fn item_updates_are_keyed_by_index() {
        let update = Update::Items(vec![(2, vec![text("c"), Dynamic::Nil])]);
        assert_eq!(payload(&update), json!({"d": {"2": {"0": "c", "1": null}}}));
    }

    #[test]
    fn root_replacement_uses_the_empty_id() {
        let tree = RenderTree::new(Statics::new(["only"]), vec![]);
        assert_eq!(
            fragments(RootUpdate::Replace(tree)),
            vec![Fragment::new("", Strategy::Replacement, json!({"s": ["only"]}))]
        );
    }
}
