use crate::error::InvariantViolation;
use crate::keys::{KeyPath, SlotKey, Statics};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use stencil_protocol::{ITEMS_KEY, STATICS_KEY};

/// Value of one dynamic slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Dynamic {
    /// Conditional branch not taken.
    Nil,
    Text(String),
    Tree(RenderTree),
    Comprehension(Comprehension),
}

impl Dynamic {
    pub fn render_into(&self, output: &mut String) {
        match self {
            Self::Nil => {}
            Self::Text(text) => output.push_str(text),
            Self::Tree(tree) => tree.render_into(output),
            Self::Comprehension(comprehension) => comprehension.render_into(output),
        }
    }

    fn contains_comprehension(&self) -> bool {
        match self {
            Self::Nil | Self::Text(_) => false,
            Self::Tree(tree) => tree.contains_comprehension(),
            Self::Comprehension(_) => true,
        }
    }

    fn validate(&self, path: &KeyPath) -> Result<(), InvariantViolation> {
        match self {
            Self::Nil | Self::Text(_) => Ok(()),
            Self::Tree(tree) => tree.validate_at(path),
            Self::Comprehension(comprehension) => comprehension.validate_at(path),
        }
    }
}

/// Statics interleaved with one dynamic per slot key.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderTree {
    statics: Statics,
    dynamics: Vec<Dynamic>,
}

impl RenderTree {
    pub fn new(statics: Statics, dynamics: Vec<Dynamic>) -> Self {
        Self { statics, dynamics }
    }

    pub fn statics(&self) -> &Statics {
        &self.statics
    }

    pub fn dynamics(&self) -> &[Dynamic] {
        &self.dynamics
    }

    pub fn dynamic(&self, key: SlotKey) -> Option<&Dynamic> {
        self.dynamics.get(key.index())
    }

    pub fn render(&self) -> String {
        let mut output = String::new();
        self.render_into(&mut output);
        output
    }

    pub fn render_into(&self, output: &mut String) {
        interleave(&self.statics, &self.dynamics, output);
    }

    pub fn contains_comprehension(&self) -> bool {
        self.dynamics.iter().any(Dynamic::contains_comprehension)
    }

    /// Checks `statics.len() == dynamics.len() + 1` at this level only.
    pub fn is_well_formed(&self) -> bool {
        self.statics.len() == self.dynamics.len() + 1
    }

    /// Checks the statics/dynamics shape at every level of the tree.
    pub fn validate(&self) -> Result<(), InvariantViolation> {
        self.validate_at(&KeyPath::root())
    }

    fn validate_at(&self, path: &KeyPath) -> Result<(), InvariantViolation> {
        if !self.is_well_formed() {
            return Err(InvariantViolation::StaticsMismatch {
                path: path.to_string(),
                statics: self.statics.len(),
                dynamics: self.dynamics.len(),
            });
        }
        validate_slots(&self.dynamics, path)
    }
}

/// The rendering of a `range`: one statics skeleton shared by every item.
#[derive(Debug, Clone, PartialEq)]
pub struct Comprehension {
    statics: Statics,
    items: Vec<Vec<Dynamic>>,
}

impl Comprehension {
    pub fn new(statics: Statics, items: Vec<Vec<Dynamic>>) -> Self {
        Self { statics, items }
    }

    pub fn statics(&self) -> &Statics {
        &self.statics
    }

    pub fn items(&self) -> &[Vec<Dynamic>] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn render_into(&self, output: &mut String) {
        for item in &self.items {
            interleave(&self.statics, item, output);
        }
    }

    pub fn is_well_formed(&self) -> bool {
        let slots = self.statics.len().saturating_sub(1);
        !self.statics.is_empty() && self.items.iter().all(|item| item.len() == slots)
    }

    fn validate_at(&self, path: &KeyPath) -> Result<(), InvariantViolation> {
        for (index, item) in self.items.iter().enumerate() {
            if item.len() + 1 != self.statics.len() {
                return Err(InvariantViolation::ItemMismatch {
                    path: path.to_string(),
                    item: index,
                    statics: self.statics.len(),
                    dynamics: item.len(),
                });
            }
            validate_slots(item, path)?;
        }
        Ok(())
    }
}

fn validate_slots(dynamics: &[Dynamic], path: &KeyPath) -> Result<(), InvariantViolation> {
    dynamics
        .iter()
        .enumerate()
        .try_for_each(|(key, dynamic)| dynamic.validate(&path.child(SlotKey::new(key as u32))))
}

fn interleave(statics: &[std::sync::Arc<str>], dynamics: &[Dynamic], output: &mut String) {
    for (index, text) in statics.iter().enumerate() {
        output.push_str(text);
        if let Some(dynamic) = dynamics.get(index) {
            dynamic.render_into(output);
        }
    }
}

impl Serialize for Dynamic {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Nil => serializer.serialize_unit(),
            Self::Text(text) => serializer.serialize_str(text),
            Self::Tree(tree) => tree.serialize(serializer),
            Self::Comprehension(comprehension) => comprehension.serialize(serializer),
        }
    }
}

impl Serialize for RenderTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.dynamics.len() + 1))?;
        map.serialize_entry(STATICS_KEY, &StaticsWire(&self.statics))?;
        for (key, dynamic) in self.dynamics.iter().enumerate() {
            map.serialize_entry(&key.to_string(), dynamic)?;
        }
        map.end()
    }
}

impl Serialize for Comprehension {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry(STATICS_KEY, &StaticsWire(&self.statics))?;
        let items: Vec<Item<'_>> = self.items.iter().map(|item| Item(item)).collect();
        map.serialize_entry(ITEMS_KEY, &items)?;
        map.end()
    }
}

struct StaticsWire<'a>(&'a Statics);

impl Serialize for StaticsWire<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter().map(|text| &**text))
    }
}

/// Slots of one comprehension item, keyed like a tree but without statics.
pub(crate) struct Item<'a>(pub &'a [Dynamic]);

impl Serialize for Item<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(
            self.0
                .iter()
                .enumerate()
                .map(|(key, dynamic)| (key.to_string(), dynamic)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text(value: &str) -> Dynamic {
        Dynamic::Text(value.to_owned())
    }

    fn sample() -> RenderTree {
        let list = Comprehension::new(Statics::new(["<li>", "</li>"]), vec![vec![text("a")], vec![text("b")]]);
        RenderTree::new(
            Statics::new(["<h1>", "</h1><ul>", "</ul>", ""]),
            vec![text("Hi"), Dynamic::Comprehension(list), Dynamic::Nil],
        )
    }

    #[test]
    fn renders_statics_around_dynamics() {
        assert_eq!(sample().render(), "<h1>Hi</h1><ul><li>a</li><li>b</li></ul>");
        assert!(sample().contains_comprehension());
    }

    #[test]
    fn serializes_to_the_wire_format() {
        assert_eq!(
            serde_json::to_value(sample()).unwrap(),
            json!({
                "s": ["<h1>", "</h1><ul>", "</ul>", ""],
                "0": "Hi",
                "1": {"s": ["<li>", "</li>"], "d": [{"0": "a"}, {"0": "b"}]},
                "2": null,
            })
        );
    }

    #[test]
    fn validation_names_the_broken_level() {
        assert_eq!(sample().validate(), Ok(()));
        let broken = RenderTree::new(
            Statics::new(["", ""]),
            vec![Dynamic::Tree(RenderTree::new(Statics::new(["x"]), vec![text("extra")]))],
        );
        assert_eq!(
            broken.validate(),
            Err(InvariantViolation::StaticsMismatch {
                path: "0".to_owned(),
                statics: 1,
                dynamics: 1,
            })
        );
        let ragged = Comprehension::new(Statics::new(["<i>", "</i>"]), vec![vec![text("a")], vec![]]);
        assert!(!ragged.is_well_formed());
        assert!(matches!(
            RenderTree::new(Statics::new(["", ""]), vec![Dynamic::Comprehension(ragged)]).validate(),
            Err(InvariantViolation::ItemMismatch { item: 1, .. })
        ));
    }
}
