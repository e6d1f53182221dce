//! Backward Riccati recursion over a linearized trajectory.

use nalgebra::linalg::Cholesky;
use nalgebra::{DMatrix, DVector};

use crate::cost::QuadraticCost;
use crate::forward::Trajectory;
use crate::linearize::Linearization;

/// Feedback gain and feedforward term for one timestep.
#[derive(Clone, Debug)]
pub struct Gain {
    /// Feedback gain `K_t` (control_dim x state_dim).
    pub k: DMatrix<f64>,
    /// Feedforward term `d_t` (control_dim).
    pub d: DVector<f64>,
}

/// Output of one backward pass: per-timestep gains plus the scalar pair that
/// predicts the cost reduction of the next forward step.
#[derive(Clone, Debug)]
pub struct BackwardPass {
    /// Gains indexed by timestep, `0..horizon`.
    pub gains: Vec<Gain>,
    /// `sum_t d_t' Qu_t`.
    pub linear_reduction: f64,
    /// `sum_t d_t' Quu_t d_t / 2`.
    pub quadratic_reduction: f64,
}

impl BackwardPass {
    /// Model-predicted cost reduction for a forward step of size `alpha`.
    pub fn expected_reduction(&self, alpha: f64) -> f64 {
        -(alpha * self.linear_reduction + alpha * alpha * self.quadratic_reduction)
    }

    /// Largest feedforward component over the horizon.
    pub fn max_feedforward(&self) -> f64 {
        self.gains.iter().map(|gain| gain.d.amax()).fold(0.0, f64::max)
    }
}

/// Signals that `Quu` lost positive definiteness at `timestep`; the pass must
/// be restarted from the terminal step with stronger regularization.
#[derive(Clone, Copy, Debug)]
pub struct NeedsRegularization {
    pub timestep: usize,
}

/// Walks the horizon backward, threading the value-function derivatives
/// through the recursion and collecting gains into a flat, time-indexed array.
///
/// `mu` is added to the diagonal of every `Quu` before the Cholesky test.
pub fn backward_pass(
    cost: &QuadraticCost,
    trajectory: &Trajectory,
    target: &DVector<f64>,
    linearizations: &[Linearization],
    mu: f64,
) -> std::result::Result<BackwardPass, NeedsRegularization> {
    let horizon = trajectory.horizon();
    debug_assert_eq!(linearizations.len(), horizon);

    let lxx = cost.stage_hessian_xx();
    let luu = cost.stage_hessian_uu();
    let control_dim = cost.control_dim();

    let mut vx = cost.terminal_gradient(&trajectory.states[horizon], target);
    let mut vxx = cost.terminal_hessian();

    let mut gains = Vec::with_capacity(horizon);
    let mut linear_reduction = 0.0;
    let mut quadratic_reduction = 0.0;

    for t in (0..horizon).rev() {
        let a = &linearizations[t].a;
        let b = &linearizations[t].b;
        let at = a.transpose();
        let bt = b.transpose();

        let qx = cost.stage_gradient_x(&trajectory.states[t], target) + &at * &vx;
        let qu = cost.stage_gradient_u(&trajectory.controls[t]) + &bt * &vx;
        let qxx = &lxx + &at * &vxx * a;
        let mut quu = &luu + &bt * &vxx * b;
        for i in 0..control_dim {
            quu[(i, i)] += mu;
        }
        let qux = &bt * &vxx * a;

        let cholesky = match Cholesky::new(quu.clone()) {
            Some(cholesky) => cholesky,
            None => return Err(NeedsRegularization { timestep: t }),
        };
        let k = -cholesky.solve(&qux);
        let d = -cholesky.solve(&qu);

        let quu_d = &quu * &d;
        linear_reduction += d.dot(&qu);
        quadratic_reduction += 0.5 * d.dot(&quu_d);

        let kt = k.transpose();
        vx = qx + &kt * &quu_d + &kt * &qu + qux.transpose() * &d;
        vxx = qxx + &kt * &quu * &k + &kt * &qux + qux.transpose() * &k;
        vxx = (&vxx + &vxx.transpose()) * 0.5;

        gains.push(Gain { k, d });
    }

    gains.reverse();
    Ok(BackwardPass {
        gains,
        linear_reduction,
        quadratic_reduction,
    })
}
