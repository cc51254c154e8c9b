//! Least squares on an assembled design.
//!
//! The fit goes through a thin QR factorization `X = QR`, so
//! `β = R⁻¹ Q'y` and `(X'X)⁻¹ = R⁻¹ R⁻ᵀ` without forming `X'X`.

use cp_core::{Error, Result};
use nalgebra::{DMatrix, DVector};

use super::design::DesignMatrix;

/// Point estimates and the pieces the variance estimators need.
#[derive(Debug, Clone)]
pub struct OlsFit {
    /// Coefficients, aligned with the design columns.
    pub coefficients: DVector<f64>,
    /// Residuals `y − Xβ`.
    pub residuals: DVector<f64>,
    /// `(X'X)⁻¹`.
    pub xtx_inv: DMatrix<f64>,
    /// Residual sum of squares.
    pub rss: f64,
    /// `n − k − df_absorbed`.
    pub df_resid: usize,
    /// R² of the (absorbed) regression.
    pub r_squared_within: f64,
}

/// Fit `y = Xβ + ε` by QR.
pub fn fit(design: &DesignMatrix) -> Result<OlsFit> {
    let x = &design.x;
    let y = &design.y;
    let n = x.nrows();
    let k = x.ncols();
    if k == 0 {
        return Err(Error::Validation("design has no regressors".into()));
    }
    let n_params = k + design.df_absorbed;
    if n <= n_params {
        return Err(Error::InsufficientDegreesOfFreedom { n_obs: n, n_params });
    }

    let qr = x.clone().qr();
    let r = qr.r();
    let qty = qr.q().transpose() * y;
    let beta = r
        .solve_upper_triangular(&qty)
        .ok_or_else(|| Error::Computation("R is singular".into()))?;
    let r_inv = r
        .solve_upper_triangular(&DMatrix::identity(k, k))
        .ok_or_else(|| Error::Computation("R is singular".into()))?;
    let xtx_inv = &r_inv * r_inv.transpose();

    let residuals = y - x * &beta;
    let rss = residuals.norm_squared();
    let tss = if design.fixed_effects.is_empty() {
        let mean = y.mean();
        y.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
    } else {
        y.norm_squared()
    };
    let r_squared_within = if tss > 0.0 { 1.0 - rss / tss } else { 0.0 };

    if !beta.iter().all(|b| b.is_finite()) {
        return Err(Error::Computation("non-finite coefficient estimate".into()));
    }

    Ok(OlsFit {
        coefficients: beta,
        residuals,
        xtx_inv,
        rss,
        df_resid: n - n_params,
        r_squared_within,
    })
}
