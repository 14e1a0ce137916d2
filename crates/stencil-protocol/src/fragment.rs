use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// How a fragment's payload was produced, ordered from cheapest to most
/// general.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    StaticDynamic,
    Markers,
    Granular,
    Replacement,
}

impl Strategy {
    pub fn rank(self) -> u8 {
        match self {
            Self::StaticDynamic => 1,
            Self::Markers => 2,
            Self::Granular => 3,
            Self::Replacement => 4,
        }
    }

    pub fn action(self) -> Action {
        match self {
            Self::StaticDynamic => Action::Update,
            Self::Markers => Action::SetText,
            Self::Granular => Action::ApplyOps,
            Self::Replacement => Action::Replace,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Update,
    SetText,
    ApplyOps,
    Replace,
}

/// One unit of update addressed to a node of the client's cached tree.
///
/// Payload shape per strategy:
/// - `static_dynamic`: the changed dynamics only, nested by slot key; a
///   comprehension whose item count is unchanged sends `{"d": {"<index>": item}}`
/// - `markers`: `[[position, text], ...]` where position counts the text slots
///   of the addressed subtree in depth-first order
/// - `granular`: a list of [`ListOp`]s applied in order
/// - `replacement`: the complete wire form of the new subtree, statics included
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub id: String,
    pub strategy: Strategy,
    pub action: Action,
    pub data: Json,
}

impl Fragment {
    pub fn new(id: impl Into<String>, strategy: Strategy, data: Json) -> Self {
        Self {
            id: id.into(),
            strategy,
            action: strategy.action(),
            data,
        }
    }
}

/// Replacement text for the text slot at `.0` in depth-first order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker(pub u32, pub String);

impl Marker {
    pub fn position(&self) -> u32 {
        self.0
    }

    pub fn text(&self) -> &str {
        &self.1
    }
}

/// Positional edit of a comprehension's item list. Indexes refer to the list
/// as it stands when the operation is applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ListOp {
    Insert { index: u32, item: Json },
    Remove { index: u32 },
    Move { from: u32, to: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fragment_wire_shape() {
        let fragment = Fragment::new("2.0", Strategy::StaticDynamic, json!({"1": "x"}));
        assert_eq!(
            serde_json::to_value(&fragment).unwrap(),
            json!({"id": "2.0", "strategy": "static_dynamic", "action": "update", "data": {"1": "x"}})
        );
    }

    #[test]
    fn action_follows_strategy() {
        assert_eq!(Strategy::Markers.action(), Action::SetText);
        assert_eq!(Strategy::Granular.action(), Action::ApplyOps);
        assert_eq!(Strategy::Replacement.action(), Action::Replace);
        assert!(Strategy::StaticDynamic < Strategy::Replacement);
        assert_eq!(Strategy::Markers.rank(), 2);
        assert!(Strategy::Granular.rank() < Strategy::Replacement.rank());
    }

    #[test]
    fn list_ops_are_tagged() {
        let ops = vec![
            ListOp::Remove { index: 3 },
            ListOp::Move { from: 2, to: 0 },
            ListOp::Insert { index: 1, item: json!({"0": "c"}) },
        ];
        assert_eq!(
            serde_json::to_value(&ops).unwrap(),
            json!([
                {"op": "remove", "index": 3},
                {"op": "move", "from": 2, "to": 0},
                {"op": "insert", "index": 1, "item": {"0": "c"}},
            ])
        );
    }

    #[test]
    fn markers_are_pairs() {
        let markers = vec![Marker(0, "a".into()), Marker(4, "b".into())];
        let json = serde_json::to_value(&markers).unwrap();
        assert_eq!(json, json!([[0, "a"], [4, "b"]]));
        let back: Vec<Marker> = serde_json::from_value(json).unwrap();
        assert_eq!(back[1].position(), 4);
        assert_eq!(back[1].text(), "b");
    }
}
