//! Trajectory rollout and the backtracking line search.

use nalgebra::DVector;

use crate::backward::BackwardPass;
use crate::cost::QuadraticCost;
use crate::error::{IlqrError, Result};
use crate::options::LineSearchOptions;

/// A state/control sequence over one planning horizon together with its cost.
///
/// Holds `horizon + 1` states and `horizon` controls.
#[derive(Clone, Debug)]
pub struct Trajectory {
    /// Visited states, starting with the initial state.
    pub states: Vec<DVector<f64>>,
    /// Applied controls, one per timestep.
    pub controls: Vec<DVector<f64>>,
    /// Accumulated running cost plus terminal cost.
    pub cost: f64,
}

impl Trajectory {
    /// Number of timesteps in the trajectory.
    pub fn horizon(&self) -> usize {
        self.controls.len()
    }
}

/// Rolls the dynamics forward under a fixed control sequence.
///
/// Fails with a divergence error as soon as the dynamics produce a non-finite
/// state, so a non-finite value can never end up inside a returned trajectory.
pub fn rollout<F>(
    dynamics: &F,
    cost: &QuadraticCost,
    initial: &DVector<f64>,
    target: &DVector<f64>,
    controls: Vec<DVector<f64>>,
) -> Result<Trajectory>
where
    F: Fn(&[f64], &[f64]) -> DVector<f64>,
{
    let horizon = controls.len();
    let mut states = Vec::with_capacity(horizon + 1);
    let mut total = 0.0;
    let mut x = initial.clone();
    states.push(x.clone());

    for (t, u) in controls.iter().enumerate() {
        total += cost.stage(&x, u, target);
        x = step(dynamics, &x, u, cost.state_dim(), t)?;
        states.push(x.clone());
    }

    total += cost.terminal(&x, target);
    if !total.is_finite() {
        return Err(IlqrError::divergence("cost evaluation", horizon));
    }

    Ok(Trajectory {
        states,
        controls,
        cost: total,
    })
}

/// Why the line search gave up on the current gains.
#[derive(Debug)]
pub(crate) enum SearchFailure {
    /// Every candidate rolled out finitely but none met the acceptance test.
    NoImprovement,
    /// Every candidate rollout left the finite domain.
    Diverged { timestep: usize },
    /// A candidate failed for a reason that escalating regularization cannot fix.
    Fatal(IlqrError),
}

/// Backtracks over decreasing step sizes until a candidate trajectory passes
/// the sufficient-decrease test against the model-predicted reduction.
///
/// A non-finite candidate rollout disqualifies only that step size.
pub(crate) fn line_search<F>(
    dynamics: &F,
    cost: &QuadraticCost,
    current: &Trajectory,
    pass: &BackwardPass,
    target: &DVector<f64>,
    gradient_clip: f64,
    options: &LineSearchOptions,
) -> std::result::Result<(Trajectory, f64), SearchFailure>
where
    F: Fn(&[f64], &[f64]) -> DVector<f64>,
{
    let mut alpha = options.initial_step;
    let mut finite_candidate = false;
    let mut divergence_timestep = 0;

    while alpha >= options.minimum_step {
        match corrected_rollout(dynamics, cost, current, pass, target, alpha, gradient_clip) {
            Ok(candidate) => {
                finite_candidate = true;
                let actual = current.cost - candidate.cost;
                let expected = pass.expected_reduction(alpha);
                let accepted = if expected > 0.0 {
                    actual >= options.sufficient_decrease * expected
                } else {
                    actual > 0.0
                };
                if accepted {
                    return Ok((candidate, alpha));
                }
            }
            Err(IlqrError::NumericalDivergence { timestep, .. }) => {
                divergence_timestep = timestep;
            }
            Err(error) => return Err(SearchFailure::Fatal(error)),
        }
        alpha *= options.step_decay;
    }

    Err(if finite_candidate {
        SearchFailure::NoImprovement
    } else {
        SearchFailure::Diverged {
            timestep: divergence_timestep,
        }
    })
}

/// Rolls out the closed-loop correction `u_t + clamp(alpha d_t + K_t (x' - x))`
/// where the clamp bounds each component of the update by `gradient_clip`.
fn corrected_rollout<F>(
    dynamics: &F,
    cost: &QuadraticCost,
    current: &Trajectory,
    pass: &BackwardPass,
    target: &DVector<f64>,
    alpha: f64,
    gradient_clip: f64,
) -> Result<Trajectory>
where
    F: Fn(&[f64], &[f64]) -> DVector<f64>,
{
    let horizon = current.horizon();
    let mut states = Vec::with_capacity(horizon + 1);
    let mut controls = Vec::with_capacity(horizon);
    let mut total = 0.0;
    let mut x = current.states[0].clone();
    states.push(x.clone());

    for t in 0..horizon {
        let gain = &pass.gains[t];
        let update = alpha * &gain.d + &gain.k * (&x - &current.states[t]);
        let update = update.map(|value| value.clamp(-gradient_clip, gradient_clip));
        let u = &current.controls[t] + update;
        if u.iter().any(|value| !value.is_finite()) {
            return Err(IlqrError::divergence("control update", t));
        }

        total += cost.stage(&x, &u, target);
        x = step(dynamics, &x, &u, cost.state_dim(), t)?;
        states.push(x.clone());
        controls.push(u);
    }

    total += cost.terminal(&x, target);
    if !total.is_finite() {
        return Err(IlqrError::divergence("cost evaluation", horizon));
    }

    Ok(Trajectory {
        states,
        controls,
        cost: total,
    })
}

fn step<F>(
    dynamics: &F,
    x: &DVector<f64>,
    u: &DVector<f64>,
    state_dim: usize,
    timestep: usize,
) -> Result<DVector<f64>>
where
    F: Fn(&[f64], &[f64]) -> DVector<f64>,
{
    let next = dynamics(x.as_slice(), u.as_slice());
    if next.len() != state_dim {
        return Err(IlqrError::dimension_mismatch(
            "dynamics output",
            state_dim,
            next.len(),
        ));
    }
    if next.iter().any(|value| !value.is_finite()) {
        return Err(IlqrError::divergence("rollout", timestep));
    }
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backward::{BackwardPass, Gain};
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;

    fn scalar_cost() -> QuadraticCost {
        QuadraticCost::new(
            1,
            1,
            DMatrix::from_row_slice(1, 1, &[1.0]),
            DMatrix::from_row_slice(1, 1, &[2.0]),
            DMatrix::from_row_slice(1, 1, &[0.5]),
        )
        .unwrap()
    }

    #[test]
    fn rollout_accumulates_states_and_cost() {
        let cost = scalar_cost();
        let dynamics = |x: &[f64], u: &[f64]| DVector::from_vec(vec![x[0] + u[0]]);
        let controls = vec![DVector::from_vec(vec![1.0]), DVector::from_vec(vec![2.0])];

        let trajectory = rollout(
            &dynamics,
            &cost,
            &DVector::zeros(1),
            &DVector::zeros(1),
            controls,
        )
        .unwrap();

        assert_eq!(trajectory.states.len(), 3);
        assert_relative_eq!(trajectory.states[1][0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(trajectory.states[2][0], 3.0, epsilon = 1e-12);
        // Running: (0 + 0.5) + (1 + 2) = 3.5, terminal: 2 * 9 = 18.
        assert_relative_eq!(trajectory.cost, 21.5, epsilon = 1e-12);
    }

    #[test]
    fn rollout_reports_divergence_timestep() {
        let cost = scalar_cost();
        let dynamics = |x: &[f64], u: &[f64]| {
            if x[0] > 1.5 {
                DVector::from_element(1, f64::NAN)
            } else {
                DVector::from_vec(vec![x[0] + u[0]])
            }
        };
        let controls = vec![DVector::from_vec(vec![1.0]); 4];

        let error = rollout(
            &dynamics,
            &cost,
            &DVector::zeros(1),
            &DVector::zeros(1),
            controls,
        )
        .unwrap_err();
        assert!(matches!(
            error,
            IlqrError::NumericalDivergence { timestep: 2, .. }
        ));
    }

    #[test]
    fn corrected_rollout_respects_gradient_clip() {
        let cost = scalar_cost();
        let dynamics = |x: &[f64], u: &[f64]| DVector::from_vec(vec![x[0] + u[0]]);
        let controls = vec![DVector::zeros(1); 3];
        let current = rollout(
            &dynamics,
            &cost,
            &DVector::zeros(1),
            &DVector::from_element(1, 5.0),
            controls,
        )
        .unwrap();

        let gains = vec![
            Gain {
                k: DMatrix::zeros(1, 1),
                d: DVector::from_element(1, 100.0),
            };
            3
        ];
        let pass = BackwardPass {
            gains,
            linear_reduction: -1.0,
            quadratic_reduction: 0.5,
        };

        let clip = 0.25;
        let candidate =
            corrected_rollout(&dynamics, &cost, &current, &pass, &DVector::from_element(1, 5.0), 1.0, clip)
                .unwrap();
        for (u_new, u_old) in candidate.controls.iter().zip(current.controls.iter()) {
            assert!((u_new[0] - u_old[0]).abs() <= clip + 1e-12);
        }
    }
}
