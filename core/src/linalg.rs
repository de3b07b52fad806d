//! Small dense symmetric solves for the fitter's normal equations.
//!
//! The fixed-effect system is p × p with p = covariates + 2, so a plain
//! Cholesky factorization is all that is needed.

/// A pivot of the factorization fell below tolerance: column `index`
/// is (numerically) a linear combination of the earlier columns.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SingularPivot {
    pub index: usize,
}

/// Solve `a · x = b` for symmetric positive-definite `a`.
///
/// A pivot counts as singular when it is not above
/// `tolerance × a[k][k]` (relative to the column's own scale).
pub fn cholesky_solve(a: &[Vec<f64>], b: &[f64], tolerance: f64) -> Result<Vec<f64>, SingularPivot> {
    let n = b.len();
    debug_assert_eq!(a.len(), n);

    let mut l = vec![vec![0.0; n]; n];
    for j in 0..n {
        let mut diag = a[j][j];
        for k in 0..j {
            diag -= l[j][k] * l[j][k];
        }
        let scale = a[j][j].abs().max(f64::MIN_POSITIVE);
        if !diag.is_finite() || diag <= tolerance * scale {
            return Err(SingularPivot { index: j });
        }
        let ljj = diag.sqrt();
        l[j][j] = ljj;
        for i in (j + 1)..n {
            let mut s = a[i][j];
            for k in 0..j {
                s -= l[i][k] * l[j][k];
            }
            l[i][j] = s / ljj;
        }
    }

    // Forward: L y = b
    let mut y = vec![0.0; n];
    for i in 0..n {
        let mut s = b[i];
        for k in 0..i {
            s -= l[i][k] * y[k];
        }
        y[i] = s / l[i][i];
    }
    // Backward: Lᵀ x = y
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut s = y[i];
        for k in (i + 1)..n {
            s -= l[k][i] * x[k];
        }
        x[i] = s / l[i][i];
    }
    Ok(x)
}
