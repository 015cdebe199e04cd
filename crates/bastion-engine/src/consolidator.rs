//! Turns a counterexample into a small cloud of training points.

use ndarray::{Array1, Array2, ArrayView1};
use rand::Rng;
use rand_distr::{Distribution, Normal, NormalError};

use bastion_core::domains::Set;

/// Attempts per requested jitter before giving up on it.
const MAX_ATTEMPTS_PER_SAMPLE: usize = 20;

/// The point itself followed by up to `n` Gaussian jitters of it with
/// standard deviation `stddev`. Jitters that leave `set` are drawn again,
/// so fewer than `n` may be returned near a thin or degenerate set.
pub fn resample<R: Rng + ?Sized>(
    point: ArrayView1<'_, f64>,
    set: &Set,
    n: usize,
    stddev: f64,
    rng: &mut R,
) -> Result<Array2<f64>, NormalError> {
    let noise = Normal::new(0.0, stddev)?;
    let dim = point.len();
    let mut rows: Vec<f64> = point.to_vec();
    let mut accepted = 0;
    let mut attempts = 0;
    while accepted < n && attempts < n * MAX_ATTEMPTS_PER_SAMPLE {
        attempts += 1;
        let candidate: Array1<f64> = point.mapv(|v| v + noise.sample(rng));
        if set.contains(candidate.view()) {
            rows.extend(candidate.iter());
            accepted += 1;
        }
    }
    // `rows` holds the point and `accepted` jitters, `dim` values each
    Ok(Array2::from_shape_fn((accepted + 1, dim), |(i, j)| rows[i * dim + j]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn square() -> Set {
        Set::cube(vec!["x0".into(), "x1".into()], -1.0, 1.0).unwrap()
    }

    #[test]
    fn jitters_stay_close_and_inside() {
        let mut rng = StdRng::seed_from_u64(9);
        let point = array![0.2, -0.3];
        let cloud = resample(point.view(), &square(), 100, 5e-3, &mut rng).unwrap();
        assert_eq!(cloud.dim(), (101, 2));
        assert_eq!(cloud.row(0), point);
        for row in cloud.rows() {
            assert!(square().contains(row));
            assert!((row[0] - 0.2).abs() < 0.05 && (row[1] + 0.3).abs() < 0.05);
        }
    }

    #[test]
    fn points_on_the_boundary_lose_some_jitters() {
        let mut rng = StdRng::seed_from_u64(10);
        let corner = array![1.0, 1.0];
        let cloud = resample(corner.view(), &square(), 200, 0.1, &mut rng).unwrap();
        assert!(cloud.nrows() <= 201);
        assert!(cloud.rows().into_iter().all(|r| square().contains(r)));
    }

    #[test]
    fn counterexample_survives_a_domain_it_left() {
        let mut rng = StdRng::seed_from_u64(4);
        let outside = array![3.0, -3.0];
        let cloud = resample(outside.view(), &square(), 50, 1e-3, &mut rng).unwrap();
        assert_eq!(cloud.dim(), (1, 2));
        assert_eq!(cloud.row(0), outside);
    }

    #[test]
    fn negative_spread_is_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(resample(array![0.0, 0.0].view(), &square(), 3, -1.0, &mut rng).is_err());
        let only_point = resample(array![0.5, 0.5].view(), &square(), 0, 1.0, &mut rng).unwrap();
        assert_eq!(only_point.nrows(), 1);
    }
}
