use serde::{Deserialize, Serialize};

/// Knobs for [`Template::compile_with`](crate::Template::compile_with).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Longest chain of `{{template}}` inclusions accepted at compile time.
    pub max_include_depth: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            max_include_depth: 32,
        }
    }
}

/// Which update strategies the diff engine may pick from. Keyed updates and
/// subtree replacement are always available.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffOptions {
    pub markers: bool,
    pub granular: bool,
    pub granular_budget: GranularBudget,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            markers: true,
            granular: true,
            granular_budget: GranularBudget::default(),
        }
    }
}

/// Upper bound on the number of list operations a granular update may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GranularBudget {
    /// Half the longer list, plus one.
    #[default]
    Half,
    Fixed(usize),
    Unbounded,
}

impl GranularBudget {
    pub fn allows(self, operations: usize, old_len: usize, new_len: usize) -> bool {
        match self {
            Self::Half => operations <= old_len.max(new_len) / 2 + 1,
            Self::Fixed(limit) => operations <= limit,
            Self::Unbounded => true,
        }
    }
}
