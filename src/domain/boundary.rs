use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Essential (Dirichlet) boundary conditions of one field, attached to named boundary markers
///
/// Degrees of freedom on a marked boundary are prescribed, so they are excluded from the DOF count.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EssentialBCs {
    values: BTreeMap<String, f64>,
}

impl EssentialBCs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prescribe a constant value on all boundary edges carrying `marker`
    pub fn with(mut self, marker: impl Into<String>, value: f64) -> Self {
        self.add(marker, value);
        self
    }

    pub fn add(&mut self, marker: impl Into<String>, value: f64) {
        self.values.insert(marker.into(), value);
    }

    pub fn is_essential(&self, marker: &str) -> bool {
        self.values.contains_key(marker)
    }

    /// Prescribed value on a marker (`None` for natural boundaries)
    pub fn value(&self, marker: &str) -> Option<f64> {
        self.values.get(marker).copied()
    }

    pub fn markers(&self) -> impl Iterator<Item = &str> + '_ {
        self.values.keys().map(|marker| marker.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
