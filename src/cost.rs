//! Quadratic state/control cost model and its closed-form derivatives.

use nalgebra::{DMatrix, DVector};

use crate::error::{IlqrError, Result};

/// Relative tolerance for the symmetry check on cost matrices.
const SYMMETRY_TOLERANCE: f64 = 1e-9;
/// Relative tolerance below which a negative eigenvalue is treated as rounding noise.
const EIGENVALUE_TOLERANCE: f64 = 1e-9;

/// Quadratic cost `l(x, u) = (x - x*)'Q(x - x*) + u'Ru` with terminal term
/// `lf(x) = (x - x*)'Qf(x - x*)`.
///
/// The cost is separable: there is no state/control cross term, so `l_ux = 0`
/// everywhere and the derivative methods below are exact.
#[derive(Clone, Debug)]
pub struct QuadraticCost {
    q: DMatrix<f64>,
    qf: DMatrix<f64>,
    r: DMatrix<f64>,
}

impl QuadraticCost {
    /// Validates the three cost matrices against the declared dimensions.
    ///
    /// Each matrix must be square with the expected dimension, symmetric, and
    /// positive-semidefinite. A zero matrix is acceptable.
    pub fn new(
        state_dim: usize,
        control_dim: usize,
        q: DMatrix<f64>,
        qf: DMatrix<f64>,
        r: DMatrix<f64>,
    ) -> Result<Self> {
        validate_cost_matrix("Q", &q, state_dim)?;
        validate_cost_matrix("Qf", &qf, state_dim)?;
        validate_cost_matrix("R", &r, control_dim)?;
        Ok(Self { q, qf, r })
    }

    /// State dimension implied by `Q`.
    pub fn state_dim(&self) -> usize {
        self.q.nrows()
    }

    /// Control dimension implied by `R`.
    pub fn control_dim(&self) -> usize {
        self.r.nrows()
    }

    /// Returns a read-only view of the running state cost matrix.
    pub fn q(&self) -> &DMatrix<f64> {
        &self.q
    }

    /// Returns a read-only view of the terminal state cost matrix.
    pub fn qf(&self) -> &DMatrix<f64> {
        &self.qf
    }

    /// Returns a read-only view of the control cost matrix.
    pub fn r(&self) -> &DMatrix<f64> {
        &self.r
    }

    /// Running cost at one timestep.
    pub fn stage(&self, x: &DVector<f64>, u: &DVector<f64>, target: &DVector<f64>) -> f64 {
        let dx = x - target;
        dx.dot(&(&self.q * &dx)) + u.dot(&(&self.r * u))
    }

    /// Terminal cost at the end of the horizon.
    pub fn terminal(&self, x: &DVector<f64>, target: &DVector<f64>) -> f64 {
        let dx = x - target;
        dx.dot(&(&self.qf * &dx))
    }

    /// Gradient of the running cost with respect to the state: `2Q(x - x*)`.
    pub fn stage_gradient_x(&self, x: &DVector<f64>, target: &DVector<f64>) -> DVector<f64> {
        2.0 * (&self.q * (x - target))
    }

    /// Gradient of the running cost with respect to the control: `2Ru`.
    pub fn stage_gradient_u(&self, u: &DVector<f64>) -> DVector<f64> {
        2.0 * (&self.r * u)
    }

    /// Hessian of the running cost with respect to the state: `2Q`.
    pub fn stage_hessian_xx(&self) -> DMatrix<f64> {
        2.0 * &self.q
    }

    /// Hessian of the running cost with respect to the control: `2R`.
    pub fn stage_hessian_uu(&self) -> DMatrix<f64> {
        2.0 * &self.r
    }

    /// Gradient of the terminal cost: `2Qf(x - x*)`.
    pub fn terminal_gradient(&self, x: &DVector<f64>, target: &DVector<f64>) -> DVector<f64> {
        2.0 * (&self.qf * (x - target))
    }

    /// Hessian of the terminal cost: `2Qf`.
    pub fn terminal_hessian(&self) -> DMatrix<f64> {
        2.0 * &self.qf
    }
}

fn validate_cost_matrix(context: &'static str, matrix: &DMatrix<f64>, dim: usize) -> Result<()> {
    if matrix.nrows() != dim {
        return Err(IlqrError::dimension_mismatch(context, dim, matrix.nrows()));
    }
    if matrix.ncols() != dim {
        return Err(IlqrError::dimension_mismatch(context, dim, matrix.ncols()));
    }
    if matrix.iter().any(|value| !value.is_finite()) {
        return Err(IlqrError::NonFiniteMatrix { context });
    }

    let scale = matrix.amax().max(1.0);
    for i in 0..dim {
        for j in (i + 1)..dim {
            if (matrix[(i, j)] - matrix[(j, i)]).abs() > SYMMETRY_TOLERANCE * scale {
                return Err(IlqrError::NotSymmetric { context });
            }
        }
    }

    if dim > 0 {
        let eigenvalues = matrix.clone().symmetric_eigen().eigenvalues;
        let smallest = eigenvalues.min();
        if smallest < -EIGENVALUE_TOLERANCE * scale {
            return Err(IlqrError::NotPositiveSemidefinite {
                context,
                eigenvalue: smallest,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn example_cost() -> QuadraticCost {
        let q = DMatrix::from_row_slice(2, 2, &[2.0, 0.5, 0.5, 1.0]);
        let qf = DMatrix::from_row_slice(2, 2, &[4.0, 0.0, 0.0, 4.0]);
        let r = DMatrix::from_row_slice(1, 1, &[0.5]);
        QuadraticCost::new(2, 1, q, qf, r).expect("valid cost matrices")
    }

    #[test]
    fn stage_cost_matches_closed_form() {
        let cost = example_cost();
        let x = DVector::from_vec(vec![1.0, -1.0]);
        let u = DVector::from_vec(vec![2.0]);
        let target = DVector::zeros(2);

        // x'Qx = 2 - 0.5 - 0.5 + 1 = 2, u'Ru = 0.5 * 4 = 2.
        assert_relative_eq!(cost.stage(&x, &u, &target), 4.0, epsilon = 1e-12);
        assert_relative_eq!(cost.terminal(&x, &target), 8.0, epsilon = 1e-12);
    }

    #[test]
    fn gradients_match_finite_differences() {
        let cost = example_cost();
        let x = DVector::from_vec(vec![0.3, -0.7]);
        let u = DVector::from_vec(vec![1.1]);
        let target = DVector::from_vec(vec![0.5, 0.5]);
        let step = 1e-6;

        let gx = cost.stage_gradient_x(&x, &target);
        for i in 0..2 {
            let mut high = x.clone();
            high[i] += step;
            let mut low = x.clone();
            low[i] -= step;
            let numeric =
                (cost.stage(&high, &u, &target) - cost.stage(&low, &u, &target)) / (2.0 * step);
            assert_relative_eq!(gx[i], numeric, epsilon = 1e-6);
        }

        let gu = cost.stage_gradient_u(&u);
        let mut high = u.clone();
        high[0] += step;
        let mut low = u.clone();
        low[0] -= step;
        let numeric = (cost.stage(&x, &high, &target) - cost.stage(&x, &low, &target)) / (2.0 * step);
        assert_relative_eq!(gu[0], numeric, epsilon = 1e-6);
    }

    #[test]
    fn rejects_dimension_mismatch() {
        let q = DMatrix::identity(3, 3);
        let qf = DMatrix::identity(2, 2);
        let r = DMatrix::identity(1, 1);
        let result = QuadraticCost::new(2, 1, q, qf, r);
        assert!(matches!(
            result,
            Err(IlqrError::DimensionMismatch { context: "Q", .. })
        ));
    }

    #[test]
    fn rejects_asymmetric_matrix() {
        let q = DMatrix::from_row_slice(2, 2, &[1.0, 0.2, -0.2, 1.0]);
        let qf = DMatrix::identity(2, 2);
        let r = DMatrix::identity(1, 1);
        let result = QuadraticCost::new(2, 1, q, qf, r);
        assert!(matches!(result, Err(IlqrError::NotSymmetric { .. })));
    }

    #[test]
    fn rejects_indefinite_matrix() {
        let q = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]);
        let qf = DMatrix::identity(2, 2);
        let r = DMatrix::identity(1, 1);
        let result = QuadraticCost::new(2, 1, q, qf, r);
        assert!(matches!(
            result,
            Err(IlqrError::NotPositiveSemidefinite { .. })
        ));
    }

    #[test]
    fn accepts_zero_matrix() {
        let q = DMatrix::zeros(2, 2);
        let qf = DMatrix::identity(2, 2);
        let r = DMatrix::from_row_slice(1, 1, &[1e-5]);
        assert!(QuadraticCost::new(2, 1, q, qf, r).is_ok());
    }
}
