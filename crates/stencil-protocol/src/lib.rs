//! Wire model shared by the stencil diff engine and whatever transport
//! carries its output to a browser.
//!
//! A render tree travels as a JSON object. Key `"s"` holds the statics and
//! the keys `"0"`..`"n-1"` hold the dynamics in slot order. A comprehension
//! keeps its shared statics under `"s"` and its items under `"d"`, each item
//! being an object keyed like a tree but without statics. An empty slot is
//! `null`, a scalar slot is a plain string.
//!
//! Updates travel as [`Fragment`]s addressed by dot-separated key paths
//! (`"2.0.1"`), the empty path naming the root itself.

mod client;
mod fragment;

pub use client::{ApplyError, CachedNode, ClientView};
pub use fragment::{Action, Fragment, ListOp, Marker, Strategy};

/// Object key carrying the statics of a tree or comprehension.
pub const STATICS_KEY: &str = "s";

/// Object key carrying the items of a comprehension.
pub const ITEMS_KEY: &str = "d";

/// Separator between slot keys in a fragment id.
pub const PATH_SEPARATOR: char = '.';
