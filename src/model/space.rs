//! Embedding spaces and per-space containers.

use serde::{Deserialize, Serialize};

/// One of the two embedding spaces being compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Space {
    /// The reference space. Alignment rotates the other space onto this one.
    Baseline,
    /// The space whose divergence from the baseline is measured.
    Comparison,
}

impl Space {
    pub const ALL: [Space; 2] = [Space::Baseline, Space::Comparison];

    pub fn label(self) -> &'static str {
        match self {
            Space::Baseline => "baseline",
            Space::Comparison => "comparison",
        }
    }
}

impl std::fmt::Display for Space {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A value held once per space.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PerSpace<T> {
    pub baseline: T,
    pub comparison: T,
}

impl<T> PerSpace<T> {
    pub fn new(baseline: T, comparison: T) -> Self {
        Self { baseline, comparison }
    }

    pub fn get(&self, space: Space) -> &T {
        match space {
            Space::Baseline => &self.baseline,
            Space::Comparison => &self.comparison,
        }
    }

    pub fn get_mut(&mut self, space: Space) -> &mut T {
        match space {
            Space::Baseline => &mut self.baseline,
            Space::Comparison => &mut self.comparison,
        }
    }

    pub fn as_ref(&self) -> PerSpace<&T> {
        PerSpace::new(&self.baseline, &self.comparison)
    }

    pub fn map<U>(self, mut f: impl FnMut(Space, T) -> U) -> PerSpace<U> {
        PerSpace {
            baseline: f(Space::Baseline, self.baseline),
            comparison: f(Space::Comparison, self.comparison),
        }
    }

    pub fn try_map<U, E>(self, mut f: impl FnMut(Space, T) -> Result<U, E>) -> Result<PerSpace<U>, E> {
        Ok(PerSpace {
            baseline: f(Space::Baseline, self.baseline)?,
            comparison: f(Space::Comparison, self.comparison)?,
        })
    }
}
