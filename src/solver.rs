//! High-level solver: configuration ownership and the outer iLQR loop.

use std::fmt;

use log::{debug, trace};
use nalgebra::{DMatrix, DVector};
use serde::Serialize;

use crate::backward::backward_pass;
use crate::cost::QuadraticCost;
use crate::error::{IlqrError, Result};
use crate::forward::{line_search, rollout, SearchFailure};
use crate::linearize::{linearize_trajectory, FiniteDifference};
use crate::options::{RegularizationOptions, SolveOptions};

/// Finite-horizon iLQR solver for a fixed problem dimensionality and cost.
///
/// The configuration is validated at construction and immutable afterwards;
/// all mutable solver state lives in a per-call context, so a shared solver
/// can serve concurrent `solve` calls.
#[derive(Clone, Debug)]
pub struct IlqrSolver {
    state_dim: usize,
    control_dim: usize,
    cost: QuadraticCost,
}

impl IlqrSolver {
    /// Creates a solver after validating every cost matrix against the
    /// declared dimensions.
    pub fn new(
        state_dim: usize,
        control_dim: usize,
        q: DMatrix<f64>,
        qf: DMatrix<f64>,
        r: DMatrix<f64>,
    ) -> Result<Self> {
        let cost = QuadraticCost::new(state_dim, control_dim, q, qf, r)?;
        Ok(Self {
            state_dim,
            control_dim,
            cost,
        })
    }

    /// Dimension of the state space.
    pub fn state_dim(&self) -> usize {
        self.state_dim
    }

    /// Dimension of the control space.
    pub fn control_dim(&self) -> usize {
        self.control_dim
    }

    /// Running state cost matrix `Q`.
    pub fn q(&self) -> &DMatrix<f64> {
        self.cost.q()
    }

    /// Terminal state cost matrix `Qf`.
    pub fn qf(&self) -> &DMatrix<f64> {
        self.cost.qf()
    }

    /// Control cost matrix `R`.
    pub fn r(&self) -> &DMatrix<f64> {
        self.cost.r()
    }

    /// Solves the planning problem with default [`SolveOptions`].
    ///
    /// `dynamics` computes the next state from the current state and control.
    /// It is treated as deterministic and side-effect-free; the `Sync` bound
    /// lets Jacobian estimation evaluate it from worker threads.
    pub fn solve<F>(
        &self,
        initial: &DVector<f64>,
        target: &DVector<f64>,
        dynamics: F,
        time_steps: usize,
    ) -> Result<Solution>
    where
        F: Fn(&[f64], &[f64]) -> DVector<f64> + Sync,
    {
        self.solve_with_options(initial, target, dynamics, time_steps, &SolveOptions::default())
    }

    /// Solves the planning problem with explicit options.
    pub fn solve_with_options<F>(
        &self,
        initial: &DVector<f64>,
        target: &DVector<f64>,
        dynamics: F,
        time_steps: usize,
        options: &SolveOptions,
    ) -> Result<Solution>
    where
        F: Fn(&[f64], &[f64]) -> DVector<f64> + Sync,
    {
        options.validate()?;
        if initial.len() != self.state_dim {
            return Err(IlqrError::dimension_mismatch(
                "initial state",
                self.state_dim,
                initial.len(),
            ));
        }
        if target.len() != self.state_dim {
            return Err(IlqrError::dimension_mismatch(
                "target state",
                self.state_dim,
                target.len(),
            ));
        }

        if time_steps == 0 {
            return Ok(Solution {
                controls: Vec::new(),
                states: vec![initial.clone()],
                cost: self.cost.terminal(initial, target),
                summary: SolveSummary {
                    iterations: 0,
                    termination: TerminationReason::FeedforwardTolerance,
                    regularization: 0.0,
                },
            });
        }

        let estimator = FiniteDifference::new(self.state_dim, self.control_dim)
            .with_step(options.finite_difference_step);
        let mut run = RunState::new(&options.regularization);

        let seed = options.initialization.controls(time_steps, self.control_dim)?;
        let mut current = rollout(&dynamics, &self.cost, initial, target, seed)?;
        debug!("initial rollout cost {:.6e}", current.cost);

        let mut iterations = 0;
        let mut termination = TerminationReason::MaxIterations;

        'outer: while iterations < options.max_iterations {
            iterations += 1;
            let linearizations = linearize_trajectory(
                &estimator,
                &dynamics,
                &current,
                options.parallel_linearization,
            )?;

            let (candidate, step) = loop {
                let pass = match backward_pass(
                    &self.cost,
                    &current,
                    target,
                    &linearizations,
                    run.mu,
                ) {
                    Ok(pass) => pass,
                    Err(signal) => {
                        trace!(
                            "control Hessian indefinite at timestep {} with mu {:.3e}",
                            signal.timestep,
                            run.mu
                        );
                        if !run.escalate() {
                            return Err(IlqrError::SingularSystem {
                                timestep: signal.timestep,
                                mu: run.mu,
                            });
                        }
                        continue;
                    }
                };

                if pass.max_feedforward() < options.feedforward_tolerance {
                    termination = TerminationReason::FeedforwardTolerance;
                    break 'outer;
                }

                match line_search(
                    &dynamics,
                    &self.cost,
                    &current,
                    &pass,
                    target,
                    options.gradient_clip,
                    &options.line_search,
                ) {
                    Ok(accepted) => break accepted,
                    Err(SearchFailure::Fatal(error)) => return Err(error),
                    Err(failure) => {
                        trace!("line search rejected every step with mu {:.3e}", run.mu);
                        if !run.escalate() {
                            return Err(match failure {
                                SearchFailure::Diverged { timestep } => {
                                    IlqrError::divergence("line search", timestep)
                                }
                                _ => IlqrError::LineSearchFailed {
                                    mu: run.mu,
                                    cost: current.cost,
                                },
                            });
                        }
                    }
                }
            };

            let improvement = current.cost - candidate.cost;
            debug!(
                "iteration {}: cost {:.6e} -> {:.6e} (step {:.3}, mu {:.3e})",
                iterations, current.cost, candidate.cost, step, run.mu
            );
            current = candidate;
            run.relax();

            if improvement < options.cost_tolerance {
                termination = TerminationReason::CostTolerance;
                break;
            }
        }

        Ok(Solution {
            cost: current.cost,
            controls: current.controls,
            states: current.states,
            summary: SolveSummary {
                iterations,
                termination,
                regularization: run.mu,
            },
        })
    }
}

impl fmt::Display for IlqrSolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== iLQR solver configuration ===")?;
        writeln!(f, "state dimension:   {}", self.state_dim)?;
        writeln!(f, "control dimension: {}", self.control_dim)?;
        writeln!(f, "Q:{}", self.cost.q())?;
        writeln!(f, "Qf:{}", self.cost.qf())?;
        writeln!(f, "R:{}", self.cost.r())?;
        Ok(())
    }
}

/// Mutable per-call state. Built at `solve` entry and dropped at exit, so
/// concurrent solves on one solver never share regularization state.
struct RunState<'a> {
    mu: f64,
    escalations: usize,
    options: &'a RegularizationOptions,
}

impl<'a> RunState<'a> {
    fn new(options: &'a RegularizationOptions) -> Self {
        Self {
            mu: options.initial,
            escalations: 0,
            options,
        }
    }

    /// Raises `mu` one notch; returns `false` once the escalation budget or
    /// the upper bound is exhausted.
    fn escalate(&mut self) -> bool {
        if self.escalations >= self.options.max_escalations {
            return false;
        }
        self.escalations += 1;
        self.mu = (self.mu * self.options.increase_factor).max(self.options.minimum);
        self.mu <= self.options.maximum
    }

    /// Lowers `mu` after an accepted step, snapping to zero below the floor.
    fn relax(&mut self) {
        self.escalations = 0;
        self.mu *= self.options.decrease_factor;
        if self.mu < self.options.minimum {
            self.mu = 0.0;
        }
    }
}

/// Why the outer loop stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum TerminationReason {
    /// The cost improvement of an accepted step fell below the tolerance.
    CostTolerance,
    /// Every feedforward component fell below the tolerance.
    FeedforwardTolerance,
    /// The iteration budget ran out; the best trajectory found is returned.
    MaxIterations,
}

/// Diagnostics describing how a solve terminated.
#[derive(Clone, Debug, Serialize)]
pub struct SolveSummary {
    /// Number of outer iterations performed.
    pub iterations: usize,
    /// The condition that stopped the outer loop.
    pub termination: TerminationReason,
    /// Regularization in effect when the loop stopped.
    pub regularization: f64,
}

/// An accepted control plan together with the trajectory it produces.
#[derive(Clone, Debug, Serialize)]
pub struct Solution {
    /// Accepted control sequence, `time_steps` vectors of `control_dim`.
    pub controls: Vec<DVector<f64>>,
    /// States visited under `controls`, starting with the initial state.
    pub states: Vec<DVector<f64>>,
    /// Total cost of the returned trajectory.
    pub cost: f64,
    /// Termination diagnostics.
    pub summary: SolveSummary,
}

impl Solution {
    /// Whether the solve met a convergence tolerance rather than running out
    /// of iterations.
    pub fn converged(&self) -> bool {
        self.summary.termination != TerminationReason::MaxIterations
    }
}
