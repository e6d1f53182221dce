//! Finite-difference estimation of per-timestep dynamics Jacobians.

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

use crate::error::{IlqrError, Result};
use crate::forward::Trajectory;

/// Default central-difference perturbation magnitude.
pub const DEFAULT_STEP: f64 = 1e-5;

/// First-order model of the dynamics around one operating point:
/// `f(x + dx, u + du) ~ f(x, u) + A dx + B du`.
///
/// Valid only for the trajectory it was computed against.
#[derive(Clone, Debug)]
pub struct Linearization {
    /// Jacobian of the next state with respect to the state (n x n).
    pub a: DMatrix<f64>,
    /// Jacobian of the next state with respect to the control (n x m).
    pub b: DMatrix<f64>,
}

/// Strategy for estimating dynamics Jacobians at an operating point.
///
/// The solver only ever has black-box evaluation access to the dynamics, so
/// the default strategy below uses finite differences; an analytic-derivative
/// implementation can be substituted without touching the backward pass.
pub trait JacobianEstimator {
    /// Estimates `A = df/dx` and `B = df/du` at `(x, u)`.
    fn estimate<F>(&self, dynamics: &F, x: &DVector<f64>, u: &DVector<f64>) -> Result<Linearization>
    where
        F: Fn(&[f64], &[f64]) -> DVector<f64> + Sync;
}

/// Central finite differences with a fixed perturbation magnitude.
///
/// Costs `2 (n + m)` dynamics evaluations per call.
#[derive(Clone, Copy, Debug)]
pub struct FiniteDifference {
    state_dim: usize,
    control_dim: usize,
    step: f64,
}

impl FiniteDifference {
    /// Creates an estimator for the given dimensions with the default step.
    pub fn new(state_dim: usize, control_dim: usize) -> Self {
        Self {
            state_dim,
            control_dim,
            step: DEFAULT_STEP,
        }
    }

    /// Overrides the perturbation magnitude.
    pub fn with_step(mut self, step: f64) -> Self {
        self.step = step;
        self
    }
}

impl JacobianEstimator for FiniteDifference {
    fn estimate<F>(&self, dynamics: &F, x: &DVector<f64>, u: &DVector<f64>) -> Result<Linearization>
    where
        F: Fn(&[f64], &[f64]) -> DVector<f64> + Sync,
    {
        let mut a = DMatrix::zeros(self.state_dim, self.state_dim);
        for i in 0..self.state_dim {
            let mut forward = x.clone();
            forward[i] += self.step;
            let mut backward = x.clone();
            backward[i] -= self.step;

            let high = evaluate(dynamics, forward.as_slice(), u.as_slice(), self.state_dim)?;
            let low = evaluate(dynamics, backward.as_slice(), u.as_slice(), self.state_dim)?;
            a.set_column(i, &((high - low) / (2.0 * self.step)));
        }

        let mut b = DMatrix::zeros(self.state_dim, self.control_dim);
        for i in 0..self.control_dim {
            let mut forward = u.clone();
            forward[i] += self.step;
            let mut backward = u.clone();
            backward[i] -= self.step;

            let high = evaluate(dynamics, x.as_slice(), forward.as_slice(), self.state_dim)?;
            let low = evaluate(dynamics, x.as_slice(), backward.as_slice(), self.state_dim)?;
            b.set_column(i, &((high - low) / (2.0 * self.step)));
        }

        Ok(Linearization { a, b })
    }
}

fn evaluate<F>(dynamics: &F, x: &[f64], u: &[f64], state_dim: usize) -> Result<DVector<f64>>
where
    F: Fn(&[f64], &[f64]) -> DVector<f64>,
{
    let next = dynamics(x, u);
    if next.len() != state_dim {
        return Err(IlqrError::dimension_mismatch(
            "dynamics output",
            state_dim,
            next.len(),
        ));
    }
    if next.iter().any(|value| !value.is_finite()) {
        return Err(IlqrError::divergence("jacobian estimation", 0));
    }
    Ok(next)
}

/// Linearizes the dynamics at every timestep of a trajectory.
///
/// Each timestep reads a fixed operating point and writes a disjoint output
/// slot, so the work distributes over rayon when `parallel` is set; both paths
/// produce identical output in the same order. Errors carry the timestep they
/// occurred at.
pub fn linearize_trajectory<E, F>(
    estimator: &E,
    dynamics: &F,
    trajectory: &Trajectory,
    parallel: bool,
) -> Result<Vec<Linearization>>
where
    E: JacobianEstimator + Sync,
    F: Fn(&[f64], &[f64]) -> DVector<f64> + Sync,
{
    let at = |t: usize| {
        estimator
            .estimate(dynamics, &trajectory.states[t], &trajectory.controls[t])
            .map_err(|error| error.at_timestep(t))
    };

    if parallel {
        (0..trajectory.horizon()).into_par_iter().map(at).collect()
    } else {
        (0..trajectory.horizon()).map(at).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::QuadraticCost;
    use crate::forward::rollout;
    use approx::assert_relative_eq;

    #[test]
    fn recovers_linear_dynamics_exactly() {
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 0.1, -0.3, 0.9]);
        let b = DMatrix::from_row_slice(2, 1, &[0.0, 0.2]);
        let dynamics = {
            let a = a.clone();
            let b = b.clone();
            move |x: &[f64], u: &[f64]| {
                &a * DVector::from_row_slice(x) + &b * DVector::from_row_slice(u)
            }
        };

        let estimator = FiniteDifference::new(2, 1);
        let linearization = estimator
            .estimate(
                &dynamics,
                &DVector::from_vec(vec![0.4, -1.0]),
                &DVector::from_element(1, 0.3),
            )
            .unwrap();

        assert_relative_eq!(linearization.a, a, epsilon = 1e-9);
        assert_relative_eq!(linearization.b, b, epsilon = 1e-9);
    }

    #[test]
    fn divergent_dynamics_carry_the_timestep() {
        let cost = QuadraticCost::new(
            1,
            1,
            DMatrix::identity(1, 1),
            DMatrix::identity(1, 1),
            DMatrix::identity(1, 1),
        )
        .unwrap();
        let benign = |x: &[f64], u: &[f64]| DVector::from_vec(vec![x[0] + u[0]]);
        let trajectory = rollout(
            &benign,
            &cost,
            &DVector::zeros(1),
            &DVector::zeros(1),
            vec![DVector::from_element(1, 1.0); 3],
        )
        .unwrap();

        // Finite along the trajectory itself, non-finite once the second
        // operating point is perturbed.
        let spiky = |x: &[f64], u: &[f64]| {
            if x[0] > 1.0 && x[0] < 2.0 {
                DVector::from_element(1, f64::INFINITY)
            } else {
                DVector::from_vec(vec![x[0] + u[0]])
            }
        };
        let estimator = FiniteDifference::new(1, 1);
        let error = linearize_trajectory(&estimator, &spiky, &trajectory, false).unwrap_err();
        assert!(matches!(
            error,
            IlqrError::NumericalDivergence { timestep: 1, .. }
        ));
    }

    #[test]
    fn parallel_and_serial_linearization_agree() {
        let cost = QuadraticCost::new(
            2,
            1,
            DMatrix::identity(2, 2),
            DMatrix::identity(2, 2),
            DMatrix::identity(1, 1),
        )
        .unwrap();
        let dynamics = |x: &[f64], u: &[f64]| {
            DVector::from_vec(vec![x[0] + 0.1 * x[1], x[1] + 0.1 * (u[0] - x[0].sin())])
        };
        let trajectory = rollout(
            &dynamics,
            &cost,
            &DVector::from_vec(vec![0.2, -0.1]),
            &DVector::zeros(2),
            vec![DVector::from_element(1, 0.5); 8],
        )
        .unwrap();

        let estimator = FiniteDifference::new(2, 1);
        let serial = linearize_trajectory(&estimator, &dynamics, &trajectory, false).unwrap();
        let parallel = linearize_trajectory(&estimator, &dynamics, &trajectory, true).unwrap();
        assert_eq!(serial.len(), parallel.len());
        for (lhs, rhs) in serial.iter().zip(parallel.iter()) {
            assert_eq!(lhs.a, rhs.a);
            assert_eq!(lhs.b, rhs.b);
        }
    }
}
