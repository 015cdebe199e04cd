//! Geometric regions used both as samplers and as solver constraints.
//!
//! A [`Set`] is identified by its ordered variable names. It can draw
//! uniform samples (rows of an `Array2`), test membership of a single point,
//! and emit a formula over caller-supplied terms that is equivalent to
//! membership.

use ndarray::{s, Array2, ArrayView1};
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use bastion_smt::terms::SmtTerm;

use crate::error::{check_len, ShapeError};

/// Samples are drawn in a ball this much smaller than the closed ball so
/// that rounding never pushes a sample outside of it.
const SPHERE_SAMPLE_SHRINK: f64 = 1.0 - 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Set {
    Rectangle {
        vars: Vec<String>,
        lower: Vec<f64>,
        upper: Vec<f64>,
    },
    /// Closed ball `‖x − center‖ ≤ radius`.
    Sphere {
        vars: Vec<String>,
        center: Vec<f64>,
        radius: f64,
    },
    /// Cartesian product; coordinates are the factors' coordinates in order.
    Product { sets: Vec<Set> },
    Union { sets: Vec<Set> },
    /// Contains nothing. Sampling yields zero rows.
    Empty { vars: Vec<String> },
}

impl Set {
    pub fn rectangle(
        vars: Vec<String>,
        lower: Vec<f64>,
        upper: Vec<f64>,
    ) -> Result<Self, ShapeError> {
        let set = Set::Rectangle { vars, lower, upper };
        set.validate()?;
        Ok(set)
    }

    /// Axis-aligned box with the same bounds on every coordinate.
    pub fn cube(vars: Vec<String>, lower: f64, upper: f64) -> Result<Self, ShapeError> {
        let n = vars.len();
        Self::rectangle(vars, vec![lower; n], vec![upper; n])
    }

    pub fn sphere(vars: Vec<String>, center: Vec<f64>, radius: f64) -> Result<Self, ShapeError> {
        let set = Set::Sphere {
            vars,
            center,
            radius,
        };
        set.validate()?;
        Ok(set)
    }

    pub fn product(sets: Vec<Set>) -> Result<Self, ShapeError> {
        let set = Set::Product { sets };
        set.validate()?;
        Ok(set)
    }

    pub fn union(sets: Vec<Set>) -> Result<Self, ShapeError> {
        let set = Set::Union { sets };
        set.validate()?;
        Ok(set)
    }

    pub fn empty(vars: Vec<String>) -> Self {
        Set::Empty { vars }
    }

    /// Check the structural invariants. Sets read from JSON should be
    /// validated before use.
    pub fn validate(&self) -> Result<(), ShapeError> {
        match self {
            Set::Rectangle { vars, lower, upper } => {
                check_len("rectangle lower bounds", lower, vars.len())?;
                check_len("rectangle upper bounds", upper, vars.len())?;
                check_finite("rectangle", vars, lower.iter().chain(upper))?;
                if let Some(i) = (0..vars.len()).find(|&i| lower[i] > upper[i]) {
                    return Err(ShapeError::new(
                        format!("rectangle bounds of `{}`", vars[i]),
                        "lower <= upper",
                        format!("[{}, {}]", lower[i], upper[i]),
                    ));
                }
                Ok(())
            }
            Set::Sphere {
                vars,
                center,
                radius,
            } => {
                check_len("sphere center", center, vars.len())?;
                check_finite("sphere", vars, center.iter().chain([radius]))?;
                if !(*radius >= 0.0) {
                    return Err(ShapeError::new(
                        "sphere radius",
                        "a non-negative radius",
                        radius,
                    ));
                }
                Ok(())
            }
            Set::Product { sets } => sets.iter().try_for_each(Set::validate),
            Set::Union { sets } => {
                let Some(first) = sets.first() else {
                    return Err(ShapeError::new("union", "at least one member", "none"));
                };
                for set in sets {
                    set.validate()?;
                    if set.dimension() != first.dimension() {
                        return Err(ShapeError::new(
                            "union member dimension",
                            first.dimension(),
                            set.dimension(),
                        ));
                    }
                }
                Ok(())
            }
            Set::Empty { .. } => Ok(()),
        }
    }

    pub fn dimension(&self) -> usize {
        match self {
            Set::Rectangle { vars, .. } | Set::Sphere { vars, .. } | Set::Empty { vars } => {
                vars.len()
            }
            Set::Product { sets } => sets.iter().map(Set::dimension).sum(),
            Set::Union { sets } => sets.first().map_or(0, Set::dimension),
        }
    }

    pub fn vars(&self) -> Vec<String> {
        match self {
            Set::Rectangle { vars, .. } | Set::Sphere { vars, .. } | Set::Empty { vars } => {
                vars.clone()
            }
            Set::Product { sets } => sets.iter().flat_map(Set::vars).collect(),
            Set::Union { sets } => sets.first().map(Set::vars).unwrap_or_default(),
        }
    }

    pub fn is_empty_set(&self) -> bool {
        match self {
            Set::Empty { .. } => true,
            Set::Product { sets } => sets.iter().any(Set::is_empty_set),
            Set::Union { sets } => sets.iter().all(Set::is_empty_set),
            _ => false,
        }
    }

    pub fn check_arity<T>(&self, items: &[T]) -> Result<(), ShapeError> {
        check_len("set arity", items, self.dimension())
    }

    /// Draw `n` points uniformly from the set, one per row.
    pub fn generate_data<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Array2<f64> {
        let dim = self.dimension();
        match self {
            Set::Rectangle { lower, upper, .. } => {
                Array2::from_shape_fn((n, dim), |(_, j)| sample_interval(rng, lower[j], upper[j]))
            }
            Set::Sphere { center, radius, .. } => {
                let mut out = Array2::zeros((n, dim));
                if dim == 0 {
                    return out;
                }
                for mut row in out.rows_mut() {
                    let direction: Vec<f64> =
                        (0..dim).map(|_| rng.sample(StandardNormal)).collect();
                    let norm = direction.iter().map(|d| d * d).sum::<f64>().sqrt();
                    let u: f64 = rng.gen();
                    let rho = radius * u.powf(1.0 / dim as f64) * SPHERE_SAMPLE_SHRINK;
                    for j in 0..dim {
                        let unit = if norm > 0.0 { direction[j] / norm } else { 0.0 };
                        row[j] = center[j] + rho * unit;
                    }
                }
                out
            }
            Set::Product { sets } => {
                if self.is_empty_set() {
                    return Array2::zeros((0, dim));
                }
                // every non-empty factor yields exactly `n` rows of its own width
                let mut out = Array2::zeros((n, dim));
                let mut col = 0;
                for set in sets {
                    let width = set.dimension();
                    out.slice_mut(s![.., col..col + width])
                        .assign(&set.generate_data(n, rng));
                    col += width;
                }
                out
            }
            Set::Union { sets } => {
                let live: Vec<&Set> = sets.iter().filter(|s| !s.is_empty_set()).collect();
                if live.is_empty() {
                    return Array2::zeros((0, dim));
                }
                // live members share the dimension (`validate`) and return
                // exactly their share of rows
                let k = live.len();
                let mut out = Array2::zeros((n, dim));
                let mut row = 0;
                for (i, set) in live.into_iter().enumerate() {
                    let share = n / k + usize::from(i < n % k);
                    out.slice_mut(s![row..row + share, ..])
                        .assign(&set.generate_data(share, rng));
                    row += share;
                }
                out
            }
            Set::Empty { .. } => Array2::zeros((0, dim)),
        }
    }

    /// Numeric membership of a single point.
    pub fn contains(&self, point: ArrayView1<'_, f64>) -> bool {
        if point.len() != self.dimension() {
            return false;
        }
        match self {
            Set::Rectangle { lower, upper, .. } => point
                .iter()
                .enumerate()
                .all(|(j, &x)| lower[j] <= x && x <= upper[j]),
            Set::Sphere { center, radius, .. } => {
                let sq: f64 = point
                    .iter()
                    .zip(center)
                    .map(|(&x, &c)| (x - c) * (x - c))
                    .sum();
                sq <= radius * radius
            }
            Set::Product { sets } => {
                let mut offset = 0;
                sets.iter().all(|s| {
                    let d = s.dimension();
                    let inside = s.contains(point.slice(ndarray::s![offset..offset + d]));
                    offset += d;
                    inside
                })
            }
            Set::Union { sets } => sets.iter().any(|s| s.contains(point)),
            Set::Empty { .. } => false,
        }
    }

    /// Membership of every row of a batch.
    pub fn contains_rows(&self, points: &Array2<f64>) -> Vec<bool> {
        points.rows().into_iter().map(|r| self.contains(r)).collect()
    }

    /// A formula over `vars` that holds exactly when the point is in the set.
    pub fn symbolic_constraints(&self, vars: &[SmtTerm]) -> Result<SmtTerm, ShapeError> {
        self.check_arity(vars)?;
        Ok(match self {
            Set::Rectangle { lower, upper, .. } => SmtTerm::and(
                vars.iter()
                    .enumerate()
                    .flat_map(|(j, x)| {
                        [
                            SmtTerm::real(lower[j]).le(x.clone()),
                            x.clone().le(SmtTerm::real(upper[j])),
                        ]
                    })
                    .collect(),
            ),
            Set::Sphere { center, radius, .. } => SmtTerm::sum(
                vars.iter()
                    .zip(center)
                    .map(|(x, &c)| x.clone().sub(SmtTerm::real(c)).square()),
            )
            .le(SmtTerm::real(radius * radius)),
            Set::Product { sets } => {
                let mut offset = 0;
                let mut parts = Vec::with_capacity(sets.len());
                for set in sets {
                    let d = set.dimension();
                    parts.push(set.symbolic_constraints(&vars[offset..offset + d])?);
                    offset += d;
                }
                SmtTerm::and(parts)
            }
            Set::Union { sets } => SmtTerm::or(
                sets.iter()
                    .map(|s| s.symbolic_constraints(vars))
                    .collect::<Result<_, _>>()?,
            ),
            Set::Empty { .. } => SmtTerm::bool(false),
        })
    }

    /// Corners of a rectangle, one per row. `None` for other shapes.
    pub fn vertices(&self) -> Option<Array2<f64>> {
        let Set::Rectangle { lower, upper, .. } = self else {
            return None;
        };
        let dim = lower.len();
        let count = 1usize.checked_shl(u32::try_from(dim).ok()?)?;
        Some(Array2::from_shape_fn((count, dim), |(i, j)| {
            if (i >> j) & 1 == 1 {
                upper[j]
            } else {
                lower[j]
            }
        }))
    }
}

/// NaN and infinite parameters make both `contains` and the solver
/// constraints meaningless.
fn check_finite<'a>(
    kind: &str,
    vars: &[String],
    values: impl IntoIterator<Item = &'a f64>,
) -> Result<(), ShapeError> {
    match values.into_iter().find(|v| !v.is_finite()) {
        Some(bad) => Err(ShapeError::new(
            format!("{kind} over {vars:?}"),
            "finite parameters",
            bad,
        )),
        None => Ok(()),
    }
}

fn sample_interval<R: Rng + ?Sized>(rng: &mut R, lo: f64, hi: f64) -> f64 {
    if lo < hi {
        rng.gen_range(lo..=hi)
    } else {
        lo
    }
}
