//! Picks, for every changed node, the smallest update a statics-caching
//! client can apply.
//!
//! Candidates, from strongest to weakest guarantee:
//!
//! 1. keyed update: only changed slot keys, or changed items by index;
//! 2. markers: changed text slots by depth-first ordinal;
//! 3. list operations on a comprehension;
//! 4. replacement of the whole subtree.
//!
//! Each node chooses on its own. A replaced child is still reported by its
//! parent as a plain keyed change.
//!
//! Shape means statics content. Taking the other branch of a conditional
//! whose bodies have the same literal text is therefore a keyed update, not
//! a replacement.

mod list;

pub(crate) use list::ListEdit;

use crate::encode;
use crate::keys::{KeyPath, SlotKey};
use crate::options::DiffOptions;
use crate::render::{Comprehension, Dynamic, RenderTree};
use log::{trace, warn};
use stencil_protocol::{Marker, Strategy};

/// Change of one node between two renders.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Update {
    Text(String),
    Keyed(Vec<(SlotKey, Update)>),
    Items(Vec<(usize, Vec<Dynamic>)>),
    Markers(Vec<Marker>),
    Granular(Vec<ListEdit>),
    Replace(Dynamic),
}

impl Update {
    pub fn strategy(&self) -> Strategy {
        match self {
            Self::Text(_) | Self::Keyed(_) | Self::Items(_) => Strategy::StaticDynamic,
            Self::Markers(_) => Strategy::Markers,
            Self::Granular(_) => Strategy::Granular,
            Self::Replace(_) => Strategy::Replacement,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RootUpdate {
    Replace(RenderTree),
    Slots(Vec<(SlotKey, Update)>),
}

pub(crate) fn compare(previous: &RenderTree, next: &RenderTree, options: &DiffOptions) -> RootUpdate {
    if !previous.is_well_formed() || !next.is_well_formed() {
        warn!("root of a render tree breaks the statics invariant, replacing it");
        return RootUpdate::Replace(next.clone());
    }
    if !previous.statics().same_shape(next.statics()) {
        trace!("root statics changed, replacing the page");
        return RootUpdate::Replace(next.clone());
    }
    let differ = Differ { options };
    RootUpdate::Slots(differ.slots(&KeyPath::root(), previous.dynamics(), next.dynamics()))
}

struct Differ<'a> {
    options: &'a DiffOptions,
}

impl Differ<'_> {
    fn slots(&self, path: &KeyPath, old: &[Dynamic], new: &[Dynamic]) -> Vec<(SlotKey, Update)> {
        old.iter()
            .zip(new)
            .enumerate()
            .filter_map(|(index, (old, new))| {
                let key = SlotKey::new(index as u32);
                self.dynamic(&path.child(key), old, new).map(|update| (key, update))
            })
            .collect()
    }

    fn dynamic(&self, path: &KeyPath, old: &Dynamic, new: &Dynamic) -> Option<Update> {
        if old == new {
            return None;
        }
        let update = match (old, new) {
            (Dynamic::Text(_), Dynamic::Text(text)) => Update::Text(text.clone()),
            (Dynamic::Tree(old), Dynamic::Tree(new)) if old.statics().same_shape(new.statics()) => {
                self.tree(path, old, new)
            }
            (Dynamic::Comprehension(old), Dynamic::Comprehension(new))
                if old.statics().same_shape(new.statics()) =>
            {
                self.comprehension(path, old, new)
            }
            _ => {
                trace!("shape changed at `{path}`");
                Update::Replace(new.clone())
            }
        };
        Some(update)
    }

    fn tree(&self, path: &KeyPath, old: &RenderTree, new: &RenderTree) -> Update {
        if !old.is_well_formed() || !new.is_well_formed() {
            warn!("tree at `{path}` breaks the statics invariant, replacing it");
            return Update::Replace(Dynamic::Tree(new.clone()));
        }
        let keyed = Update::Keyed(self.slots(path, old.dynamics(), new.dynamics()));
        if !self.options.markers || old.contains_comprehension() || new.contains_comprehension() {
            return keyed;
        }
        let mut markers = Vec::new();
        if text_markers(old.dynamics(), new.dynamics(), &mut 0, &mut markers).is_none() {
            return keyed;
        }
        let markers = Update::Markers(markers);
        if encode::size(&markers) < encode::size(&keyed) {
            trace!("markers at `{path}`");
            markers
        } else {
            keyed
        }
    }

    fn comprehension(&self, path: &KeyPath, old: &Comprehension, new: &Comprehension) -> Update {
        let replace = Update::Replace(Dynamic::Comprehension(new.clone()));
        if !old.is_well_formed() || !new.is_well_formed() {
            warn!("comprehension at `{path}` has ragged items, replacing it");
            return replace;
        }
        let mut candidates = Vec::with_capacity(3);
        if old.len() == new.len() {
            let changed = old
                .items()
                .iter()
                .zip(new.items())
                .enumerate()
                .filter(|(_, (old, new))| old != new)
                .map(|(index, (_, new))| (index, new.clone()))
                .collect();
            candidates.push(Update::Items(changed));
        }
        if self.options.granular {
            let budget = self.options.granular_budget;
            match list::edits(old.items(), new.items()) {
                Some(edits) if budget.allows(edits.len(), old.len(), new.len()) => {
                    candidates.push(Update::Granular(edits));
                }
                Some(edits) => trace!("{} list operations at `{path}` exceed the budget", edits.len()),
                None => warn!("list operations at `{path}` did not reproduce the new items"),
            }
        }
        candidates.push(replace);
        let chosen = smallest(candidates)
            .unwrap_or_else(|| Update::Replace(Dynamic::Comprehension(new.clone())));
        trace!("{:?} at `{path}`", chosen.strategy());
        chosen
    }
}

/// Smallest of `candidates`, the lower strategy on equal size.
fn smallest(candidates: Vec<Update>) -> Option<Update> {
    candidates
        .into_iter()
        .min_by_key(|candidate| (encode::size(candidate), candidate.strategy().rank()))
}

/// Collects the text slots that differ, numbered depth-first over the text
/// slots of the subtree. Fails on anything but text-for-text changes.
fn text_markers(old: &[Dynamic], new: &[Dynamic], ordinal: &mut u32, markers: &mut Vec<Marker>) -> Option<()> {
    if old.len() != new.len() {
        return None;
    }
    for (old, new) in old.iter().zip(new) {
        match (old, new) {
            (Dynamic::Nil, Dynamic::Nil) => {}
            (Dynamic::Text(old), Dynamic::Text(new)) => {
                if old != new {
                    markers.push(Marker(*ordinal, new.clone()));
                }
                *ordinal += 1;
            }
            (Dynamic::Tree(old), Dynamic::Tree(new)) if old.statics().same_shape(new.statics()) => {
                text_markers(old.dynamics(), new.dynamics(), ordinal, markers)?;
            }
            _ => return None,
        }
    }
    Some(())
}
