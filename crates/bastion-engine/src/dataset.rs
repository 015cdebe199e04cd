//! Training points per domain. Rows only ever get appended.

use std::collections::BTreeMap;

use ndarray::{Array2, ArrayView2, Axis};
use rand::Rng;

use bastion_core::consts::DomainName;
use bastion_core::domains::Set;
use bastion_core::error::ShapeError;
use bastion_core::systems::{ControlAffineDynamics, SystemError};

use crate::translator::ConditionKind;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    data: BTreeMap<DomainName, Array2<f64>>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// `n` samples for every clause of the certificate.
    pub fn generate<R: Rng + ?Sized>(
        system: &dyn ControlAffineDynamics,
        kinds: &[ConditionKind],
        n: usize,
        rng: &mut R,
    ) -> Result<Self, SystemError> {
        let mut dataset = Self::new();
        for &kind in kinds {
            let points = sampling_set(system, kind)?.generate_data(n, rng);
            dataset.append(kind.dataset(), points.view())?;
        }
        Ok(dataset)
    }

    pub fn get(&self, name: DomainName) -> Option<&Array2<f64>> {
        self.data.get(&name)
    }

    pub fn len(&self, name: DomainName) -> usize {
        self.data.get(&name).map_or(0, |d| d.nrows())
    }

    pub fn is_empty(&self) -> bool {
        self.data.values().all(|d| d.nrows() == 0)
    }

    pub fn append(&mut self, name: DomainName, rows: ArrayView2<'_, f64>) -> Result<(), ShapeError> {
        let cols = rows.ncols();
        let entry = self
            .data
            .entry(name)
            .or_insert_with(|| Array2::zeros((0, cols)));
        if entry.ncols() != cols {
            return Err(ShapeError::new(
                format!("{name} data"),
                format!("{} columns", entry.ncols()),
                format!("{cols} columns"),
            ));
        }
        entry
            .append(Axis(0), rows)
            .map_err(|e| ShapeError::new(format!("{name} data"), "appendable rows", e))
    }

    pub fn sizes(&self) -> BTreeMap<DomainName, usize> {
        self.data.iter().map(|(k, v)| (*k, v.nrows())).collect()
    }
}

/// The region a clause is checked over, as one set. Robust clauses range
/// over `X_D × U × Z`.
pub fn sampling_set(
    system: &dyn ControlAffineDynamics,
    kind: ConditionKind,
) -> Result<Set, SystemError> {
    let domain = |name: DomainName| {
        system
            .domain(name)
            .cloned()
            .ok_or_else(|| SystemError::MissingDomain {
                system: system.id().to_string(),
                domain: name,
            })
    };
    match kind {
        ConditionKind::Init => domain(DomainName::Init),
        ConditionKind::Unsafe => domain(DomainName::Unsafe),
        ConditionKind::Lie => domain(DomainName::Lie),
        ConditionKind::Robust => Ok(Set::product(vec![
            domain(DomainName::Lie)?,
            domain(DomainName::Input)?,
            domain(DomainName::Uncertainty)?,
        ])?),
    }
}
