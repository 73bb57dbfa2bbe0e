use nalgebra::{Matrix3, Vector3};
use rand::Rng;
use rand_distr::StandardNormal;

const REDUCTION_TOLERANCE: f64 = 1e-8;
const MAX_REDUCTION_PASSES: usize = 1000;

pub fn frac_to_cart(cell: &Matrix3<f64>, frac: &Vector3<f64>) -> Vector3<f64> {
    cell * frac
}

pub fn cart_to_frac(inverse_cell: &Matrix3<f64>, cart: &Vector3<f64>) -> Vector3<f64> {
    inverse_cell * cart
}

/// Maps every fractional component into `[0, 1)`.
pub fn wrap_fractional(frac: &Vector3<f64>) -> Vector3<f64> {
    frac.map(|x| {
        let wrapped = x - x.floor();
        if wrapped >= 1.0 { 0.0 } else { wrapped }
    })
}

/// Shortest distance between two fractional positions under periodic boundary
/// conditions, searching the 27 images around the wrapped difference.
pub fn minimum_image_distance(
    cell: &Matrix3<f64>,
    frac1: &Vector3<f64>,
    frac2: &Vector3<f64>,
) -> f64 {
    let diff = (frac1 - frac2).map(|x| x - x.round());
    let mut best = f64::INFINITY;
    for i in -1..=1 {
        for j in -1..=1 {
            for k in -1..=1 {
                let shifted = diff + Vector3::new(i as f64, j as f64, k as f64);
                let dist = (cell * shifted).norm();
                if dist < best {
                    best = dist;
                }
            }
        }
    }
    best
}

/// Length of the shortest non-zero lattice translation, i.e. the distance
/// between an atom and its own nearest periodic image.
pub fn shortest_lattice_vector(cell: &Matrix3<f64>) -> f64 {
    let mut best = f64::INFINITY;
    for i in -1i32..=1 {
        for j in -1i32..=1 {
            for k in -1i32..=1 {
                if i == 0 && j == 0 && k == 0 {
                    continue;
                }
                let v = cell * Vector3::new(i as f64, j as f64, k as f64);
                best = best.min(v.norm());
            }
        }
    }
    best
}

/// Reduces a cell (columns are lattice vectors) by repeatedly subtracting
/// integer multiples of one vector from another until every pair satisfies
/// `|v_i . v_j| <= |v_j|^2 / 2`.
///
/// On convergence all inter-vector angles lie in `[60, 120]` degrees. The
/// transformation is unimodular, so the cell volume is preserved.
pub fn reduce_cell(cell: &Matrix3<f64>) -> Matrix3<f64> {
    let mut vectors = [
        cell.column(0).into_owned(),
        cell.column(1).into_owned(),
        cell.column(2).into_owned(),
    ];

    for _ in 0..MAX_REDUCTION_PASSES {
        let mut changed = false;
        for i in 0..3 {
            for j in 0..3 {
                if i == j {
                    continue;
                }
                let norm_sq = vectors[j].norm_squared();
                if norm_sq <= REDUCTION_TOLERANCE {
                    continue;
                }
                let ratio = vectors[i].dot(&vectors[j]) / norm_sq;
                if ratio.abs() > 0.5 + REDUCTION_TOLERANCE {
                    let m = ratio.round();
                    vectors[i] -= vectors[j] * m;
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }

    // Keep a right-handed basis.
    let mut reduced = Matrix3::from_columns(&vectors);
    if reduced.determinant() < 0.0 {
        reduced.set_column(2, &(-vectors[2]));
    }
    reduced
}

/// Draws a symmetric strain matrix `I + e` where each independent component
/// of `e` is normally distributed with the given standard deviation.
pub fn random_strain(rng: &mut impl Rng, stdev: f64) -> Matrix3<f64> {
    let mut draw = || -> f64 { rng.sample::<f64, _>(StandardNormal) * stdev };
    let (e11, e22, e33) = (draw(), draw(), draw());
    let (e23, e13, e12) = (draw() * 0.5, draw() * 0.5, draw() * 0.5);
    #[rustfmt::skip]
    let strain = Matrix3::new(
        1.0 + e11, e12,       e13,
        e12,       1.0 + e22, e23,
        e13,       e23,       1.0 + e33,
    );
    strain
}
