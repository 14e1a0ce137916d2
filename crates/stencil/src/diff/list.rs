//! Item-level edits between two comprehensions with the same skeleton.

use crate::render::Dynamic;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ListEdit {
    Insert { index: usize, item: Vec<Dynamic> },
    Remove { index: usize },
    Move { from: usize, to: usize },
}

/// Edits turning `old` into `new` when applied in order. Equal items are
/// reused (first unmatched match wins), so unchanged items are never sent.
pub(crate) fn edits(old: &[Vec<Dynamic>], new: &[Vec<Dynamic>]) -> Option<Vec<ListEdit>> {
    let mut matched = vec![false; new.len()];
    // New index each old item moves to, `None` when it is dropped.
    let targets: Vec<Option<usize>> = old
        .iter()
        .map(|item| {
            let target = (0..new.len()).find(|&index| !matched[index] && new[index] == *item)?;
            matched[target] = true;
            Some(target)
        })
        .collect();

    let mut edits = Vec::new();
    for (index, target) in targets.iter().enumerate().rev() {
        if target.is_none() {
            edits.push(ListEdit::Remove { index });
        }
    }
    let mut working: Vec<usize> = targets.into_iter().flatten().collect();

    for (index, item) in new.iter().enumerate() {
        if matched[index] {
            let from = working.iter().position(|&target| target == index)?;
            if from != index {
                let target = working.remove(from);
                working.insert(index, target);
                edits.push(ListEdit::Move { from, to: index });
            }
        } else {
            working.insert(index, index);
            edits.push(ListEdit::Insert {
                index,
                item: item.clone(),
            });
        }
    }

    let settled = working.len() == new.len() && working.iter().enumerate().all(|(index, target)| index == *target);
    settled.then_some(edits)
}
