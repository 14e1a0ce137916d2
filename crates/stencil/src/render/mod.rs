//! Applying a compiled template to data.
//!
//! [`compile`] produces a [`RenderTree`] whose statics come straight from the
//! template layout, so every render of one template shares them. [`execute`]
//! writes plain text and never builds a tree; the two agree on output for
//! every template and binding.

mod compile;
mod text;
mod tree;

pub(crate) use compile::compile;
pub(crate) use text::execute;
pub use tree::{Comprehension, Dynamic, RenderTree};
pub(crate) use tree::Item;
