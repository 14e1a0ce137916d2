use crate::{Fragment, ITEMS_KEY, ListOp, Marker, PATH_SEPARATOR, STATICS_KEY, Strategy};
use log::trace;
use serde_json::{Map, Value as Json};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("malformed wire tree: {0}")]
    Malformed(String),
    #[error("invalid fragment id `{0}`")]
    InvalidId(String),
    #[error("fragment `{0}` addresses a slot that does not exist")]
    MissingSlot(String),
    #[error("fragment `{id}` does not fit the cached node: {reason}")]
    Mismatch { id: String, reason: String },
    #[error("list operation out of bounds at `{id}`: {op:?}")]
    OutOfBounds { id: String, op: ListOp },
    #[error("malformed payload in fragment `{id}`: {source}")]
    Payload {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A node of the client-side cache: statics are stored once and reused by
/// every later update that leaves the node's shape alone.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedNode {
    Nil,
    Text(String),
    Tree {
        statics: Vec<String>,
        dynamics: Vec<CachedNode>,
    },
    Comprehension {
        statics: Vec<String>,
        items: Vec<Vec<CachedNode>>,
    },
}

impl CachedNode {
    pub fn decode(json: &Json) -> Result<Self, ApplyError> {
        match json {
            Json::Null => Ok(Self::Nil),
            Json::String(text) => Ok(Self::Text(text.clone())),
            Json::Object(object) => {
                let statics = decode_statics(object)?;
                let slots = statics.len().saturating_sub(1);
                match object.get(ITEMS_KEY) {
                    Some(Json::Array(items)) => {
                        let items = items
                            .iter()
                            .map(|item| decode_item(item, slots))
                            .collect::<Result<_, _>>()?;
                        Ok(Self::Comprehension { statics, items })
                    }
                    Some(other) => Err(ApplyError::Malformed(format!("items must be an array, got {other}"))),
                    None => {
                        let dynamics = decode_slots(object, slots)?;
                        Ok(Self::Tree { statics, dynamics })
                    }
                }
            }
            other => Err(ApplyError::Malformed(format!("unexpected value {other}"))),
        }
    }

    pub fn render(&self) -> String {
        let mut output = String::new();
        self.render_into(&mut output);
        output
    }

    pub fn render_into(&self, output: &mut String) {
        match self {
            Self::Nil => {}
            Self::Text(text) => output.push_str(text),
            Self::Tree { statics, dynamics } => interleave(statics, dynamics, output),
            Self::Comprehension { statics, items } => {
                for item in items {
                    interleave(statics, item, output);
                }
            }
        }
    }

    fn apply_keyed(&mut self, id: &str, data: &Json) -> Result<(), ApplyError> {
        match data {
            Json::Object(object) if object.contains_key(STATICS_KEY) => {
                *self = Self::decode(data)?;
            }
            Json::Object(object) if object.contains_key(ITEMS_KEY) => {
                let Self::Comprehension { statics, items } = self else {
                    return Err(mismatch(id, "item update for a node that is not a comprehension"));
                };
                let Some(Json::Object(changed)) = object.get(ITEMS_KEY) else {
                    return Err(mismatch(id, "item update must be keyed by index"));
                };
                let slots = statics.len().saturating_sub(1);
                for (index, item) in changed {
                    let slot = parse_index(index)
                        .and_then(|index| items.get_mut(index))
                        .ok_or_else(|| ApplyError::MissingSlot(format!("{id}.{index}")))?;
                    *slot = decode_item(item, slots)?;
                }
            }
            Json::Object(object) => {
                let Self::Tree { dynamics, .. } = self else {
                    return Err(mismatch(id, "keyed update for a node that is not a tree"));
                };
                for (key, value) in object {
                    let child = parse_index(key)
                        .and_then(|index| dynamics.get_mut(index))
                        .ok_or_else(|| ApplyError::MissingSlot(format!("{id}.{key}")))?;
                    child.apply_keyed(id, value)?;
                }
            }
            Json::String(text) => *self = Self::Text(text.clone()),
            Json::Null => *self = Self::Nil,
            other => return Err(mismatch(id, &format!("unexpected payload {other}"))),
        }
        Ok(())
    }

    fn apply_markers(&mut self, id: &str, markers: &[Marker]) -> Result<(), ApplyError> {
        let mut texts = Vec::new();
        collect_texts(self, &mut texts);
        for marker in markers {
            let text = texts
                .get_mut(marker.position() as usize)
                .ok_or_else(|| mismatch(id, &format!("no text slot at position {}", marker.position())))?;
            **text = marker.text().to_owned();
        }
        Ok(())
    }

    fn apply_ops(&mut self, id: &str, ops: &[ListOp]) -> Result<(), ApplyError> {
        let Self::Comprehension { statics, items } = self else {
            return Err(mismatch(id, "list operations for a node that is not a comprehension"));
        };
        let slots = statics.len().saturating_sub(1);
        for op in ops {
            let out_of_bounds = || ApplyError::OutOfBounds {
                id: id.to_owned(),
                op: op.clone(),
            };
            match op {
                ListOp::Insert { index, item } => {
                    let index = *index as usize;
                    if index > items.len() {
                        return Err(out_of_bounds());
                    }
                    items.insert(index, decode_item(item, slots)?);
                }
                ListOp::Remove { index } => {
                    let index = *index as usize;
                    if index >= items.len() {
                        return Err(out_of_bounds());
                    }
                    items.remove(index);
                }
                ListOp::Move { from, to } => {
                    let (from, to) = (*from as usize, *to as usize);
                    if from >= items.len() || to >= items.len() {
                        return Err(out_of_bounds());
                    }
                    let item = items.remove(from);
                    items.insert(to, item);
                }
            }
        }
        Ok(())
    }
}

/// Reference client: caches the initial tree and patches it fragment by
/// fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientView {
    root: CachedNode,
}

impl ClientView {
    pub fn from_wire(json: &Json) -> Result<Self, ApplyError> {
        match CachedNode::decode(json)? {
            root @ CachedNode::Tree { .. } => Ok(Self { root }),
            _ => Err(ApplyError::Malformed("root must be a tree".to_owned())),
        }
    }

    pub fn root(&self) -> &CachedNode {
        &self.root
    }

    pub fn render(&self) -> String {
        self.root.render()
    }

    pub fn apply_all<'a>(
        &mut self,
        fragments: impl IntoIterator<Item = &'a Fragment>,
    ) -> Result<(), ApplyError> {
        fragments.into_iter().try_for_each(|fragment| self.apply(fragment))
    }

    pub fn apply(&mut self, fragment: &Fragment) -> Result<(), ApplyError> {
        trace!("applying {:?} fragment at `{}`", fragment.strategy, fragment.id);
        let id = fragment.id.as_str();
        let node = self.node_mut(id)?;
        match fragment.strategy {
            Strategy::StaticDynamic => node.apply_keyed(id, &fragment.data),
            Strategy::Markers => {
                let markers: Vec<Marker> = payload(id, &fragment.data)?;
                node.apply_markers(id, &markers)
            }
            Strategy::Granular => {
                let ops: Vec<ListOp> = payload(id, &fragment.data)?;
                node.apply_ops(id, &ops)
            }
            Strategy::Replacement => {
                let replacement = CachedNode::decode(&fragment.data)?;
                if id.is_empty() && !matches!(replacement, CachedNode::Tree { .. }) {
                    return Err(mismatch(id, "root replacement must be a tree"));
                }
                *node = replacement;
                Ok(())
            }
        }
    }

    fn node_mut(&mut self, id: &str) -> Result<&mut CachedNode, ApplyError> {
        let mut node = &mut self.root;
        if id.is_empty() {
            return Ok(node);
        }
        for key in id.split(PATH_SEPARATOR) {
            let index = parse_index(key).ok_or_else(|| ApplyError::InvalidId(id.to_owned()))?;
            node = match node {
                CachedNode::Tree { dynamics, .. } => dynamics
                    .get_mut(index)
                    .ok_or_else(|| ApplyError::MissingSlot(id.to_owned()))?,
                _ => return Err(ApplyError::MissingSlot(id.to_owned())),
            };
        }
        Ok(node)
    }
}

fn payload<T: serde::de::DeserializeOwned>(id: &str, data: &Json) -> Result<T, ApplyError> {
    serde_json::from_value(data.clone()).map_err(|source| ApplyError::Payload {
        id: id.to_owned(),
        source,
    })
}

fn decode_statics(object: &Map<String, Json>) -> Result<Vec<String>, ApplyError> {
    let Some(Json::Array(statics)) = object.get(STATICS_KEY) else {
        return Err(ApplyError::Malformed("missing statics".to_owned()));
    };
    let statics = statics
        .iter()
        .map(|text| match text {
            Json::String(text) => Ok(text.clone()),
            other => Err(ApplyError::Malformed(format!("static must be a string, got {other}"))),
        })
        .collect::<Result<Vec<_>, _>>()?;
    if statics.is_empty() {
        return Err(ApplyError::Malformed("statics must not be empty".to_owned()));
    }
    Ok(statics)
}

fn decode_item(item: &Json, slots: usize) -> Result<Vec<CachedNode>, ApplyError> {
    match item {
        Json::Object(object) => decode_slots(object, slots),
        other => Err(ApplyError::Malformed(format!("item must be an object, got {other}"))),
    }
}

fn decode_slots(object: &Map<String, Json>, slots: usize) -> Result<Vec<CachedNode>, ApplyError> {
    (0..slots)
        .map(|index| {
            object
                .get(&index.to_string())
                .ok_or_else(|| ApplyError::Malformed(format!("missing dynamic `{index}`")))
                .and_then(CachedNode::decode)
        })
        .collect()
}

fn interleave(statics: &[String], dynamics: &[CachedNode], output: &mut String) {
    for (index, text) in statics.iter().enumerate() {
        output.push_str(text);
        if let Some(dynamic) = dynamics.get(index) {
            dynamic.render_into(output);
        }
    }
}

fn collect_texts<'a>(node: &'a mut CachedNode, texts: &mut Vec<&'a mut String>) {
    match node {
        CachedNode::Nil => {}
        CachedNode::Text(text) => texts.push(text),
        CachedNode::Tree { dynamics, .. } => {
            for dynamic in dynamics.iter_mut() {
                collect_texts(dynamic, texts);
            }
        }
        CachedNode::Comprehension { items, .. } => {
            for dynamic in items.iter_mut().flatten() {
                collect_texts(dynamic, texts);
            }
        }
    }
}

fn parse_index(key: &str) -> Option<usize> {
    if key.is_empty() || !key.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    key.parse().ok()
}

fn mismatch(id: &str, reason: &str) -> ApplyError {
    ApplyError::Mismatch {
        id: id.to_owned(),
        reason: reason.to_owned(),
    }
}
