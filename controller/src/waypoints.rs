use nalgebra::{DMatrix, DVector};

use control_model::ReferencePath;
use prelude::*;
use crate::Error;

/// Fewest waypoints accepted for a reference fit, whatever its order.
pub const MIN_WAYPOINTS: usize = 4;

/// Smallest ratio between the diagonal entries of the QR `R` factor that is still considered
/// full rank.
const MIN_CONDITIONING: float = 1e-10;

/// Expresses a world frame point in the frame of a vehicle at `(px, py)` with heading `psi`.
pub fn to_local(px: float, py: float, psi: float, wx: float, wy: float) -> (float, float) {
    let (dx, dy) = (wx - px, wy - py);
    let (sin_psi, cos_psi) = psi.sin_cos();
    (dx * cos_psi + dy * sin_psi, -dx * sin_psi + dy * cos_psi)
}

pub fn to_world(px: float, py: float, psi: float, lx: float, ly: float) -> (float, float) {
    let (sin_psi, cos_psi) = psi.sin_cos();
    (px + lx * cos_psi - ly * sin_psi, py + lx * sin_psi + ly * cos_psi)
}

/// Least squares fit of a polynomial of `order` through the points, lowest order coefficient
/// first.
pub fn polyfit(xs: &[float], ys: &[float], order: usize) -> Result<Vec<float>, Error> {
    if xs.len() != ys.len() {
        return Err(Error::MismatchedWaypoints {
            xs: xs.len(),
            ys: ys.len(),
        });
    }
    let points = xs.len();
    if points < MIN_WAYPOINTS || order >= points {
        return Err(Error::InsufficientWaypoints { points, order });
    }
    if xs.iter().chain(ys).any(|v| !v.is_finite()) {
        return Err(Error::DegenerateGeometry {
            conditioning: float::NAN,
        });
    }

    // Vandermonde design matrix
    let A = DMatrix::from_fn(points, order + 1, |r, c| xs[r].powi(c as i32));
    let b = DVector::from_column_slice(ys);

    let qr = A.qr();
    let R = qr.r();

    let diag = R.diagonal();
    let largest = diag.iter().fold(0.0, |acc: float, r| max(acc, r.abs()));
    let smallest = diag.iter().fold(INFINITY, |acc: float, r| min(acc, r.abs()));
    let conditioning = if largest > 0.0 { smallest / largest } else { 0.0 };
    if !(conditioning >= MIN_CONDITIONING) {
        return Err(Error::DegenerateGeometry { conditioning });
    }

    let Qtb = qr.q().transpose() * b;
    let coeffs = R
        .solve_upper_triangular(&Qtb)
        .ok_or(Error::DegenerateGeometry { conditioning })?;

    if coeffs.iter().any(|c| !c.is_finite()) {
        return Err(Error::DegenerateGeometry { conditioning });
    }
    Ok(coeffs.iter().cloned().collect())
}

/// Transforms world frame waypoints into the vehicle frame and fits the reference through them.
pub fn fit_reference(
    ptsx: &[float],
    ptsy: &[float],
    px: float,
    py: float,
    psi: float,
    order: usize,
) -> Result<ReferencePath, Error> {
    assert!(order <= 3, "reference path is at most cubic");
    if ptsx.len() != ptsy.len() {
        return Err(Error::MismatchedWaypoints {
            xs: ptsx.len(),
            ys: ptsy.len(),
        });
    }

    let (xs, ys): (Vec<_>, Vec<_>) = ptsx
        .iter()
        .zip(ptsy)
        .map(|(&wx, &wy)| to_local(px, py, psi, wx, wy))
        .unzip();

    let coeffs = polyfit(&xs, &ys, order)?;
    Ok(ReferencePath::from_slice(&coeffs))
}
