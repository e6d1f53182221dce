//! Solver options: control-sequence initialization, tolerances, and the
//! regularization and line-search schedules.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::error::{IlqrError, Result};
use crate::linearize::DEFAULT_STEP;

/// How the initial control sequence is seeded before the first rollout.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub enum Initialization {
    /// Start from the all-zero control sequence.
    #[default]
    Zeros,
    /// Fill every control component with the given scalar.
    Scalar(f64),
    /// Fill every timestep with a copy of the given control vector.
    Vector(DVector<f64>),
}

impl Initialization {
    pub(crate) fn controls(
        &self,
        time_steps: usize,
        control_dim: usize,
    ) -> Result<Vec<DVector<f64>>> {
        match self {
            Self::Zeros => Ok(vec![DVector::zeros(control_dim); time_steps]),
            Self::Scalar(value) => {
                if !value.is_finite() {
                    return Err(IlqrError::invalid_option("initialization scalar", *value));
                }
                Ok(vec![DVector::from_element(control_dim, *value); time_steps])
            }
            Self::Vector(control) => {
                if control.len() != control_dim {
                    return Err(IlqrError::dimension_mismatch(
                        "initialization control",
                        control_dim,
                        control.len(),
                    ));
                }
                if control.iter().any(|value| !value.is_finite()) {
                    return Err(IlqrError::invalid_option("initialization control", f64::NAN));
                }
                Ok(vec![control.clone(); time_steps])
            }
        }
    }
}

/// Schedule for the damping term added to the control Hessian.
///
/// `mu` starts at `initial` on every solve, is multiplied by
/// `increase_factor` (and lifted to at least `minimum`) whenever a backward
/// or forward pass fails, and is multiplied by `decrease_factor` after every
/// accepted step, snapping to zero once it falls below `minimum`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegularizationOptions {
    /// Damping at the start of each solve.
    pub initial: f64,
    /// Floor for nonzero damping values.
    pub minimum: f64,
    /// Hard cap; exceeding it fails the solve.
    pub maximum: f64,
    /// Multiplier applied on a failed backward or forward pass.
    pub increase_factor: f64,
    /// Multiplier applied after an accepted step.
    pub decrease_factor: f64,
    /// Escalations allowed per outer iteration before giving up.
    pub max_escalations: usize,
}

impl Default for RegularizationOptions {
    fn default() -> Self {
        Self {
            initial: 0.0,
            minimum: 1e-6,
            maximum: 1e10,
            increase_factor: 10.0,
            decrease_factor: 0.1,
            max_escalations: 32,
        }
    }
}

impl RegularizationOptions {
    fn validate(&self) -> Result<()> {
        if !(self.initial >= 0.0) || !self.initial.is_finite() {
            return Err(IlqrError::invalid_option("regularization.initial", self.initial));
        }
        if !(self.minimum > 0.0) || !self.minimum.is_finite() {
            return Err(IlqrError::invalid_option("regularization.minimum", self.minimum));
        }
        if !(self.maximum > self.minimum) {
            return Err(IlqrError::invalid_option("regularization.maximum", self.maximum));
        }
        if !(self.increase_factor > 1.0) || !self.increase_factor.is_finite() {
            return Err(IlqrError::invalid_option(
                "regularization.increase_factor",
                self.increase_factor,
            ));
        }
        if !(self.decrease_factor > 0.0 && self.decrease_factor < 1.0) {
            return Err(IlqrError::invalid_option(
                "regularization.decrease_factor",
                self.decrease_factor,
            ));
        }
        if self.max_escalations == 0 {
            return Err(IlqrError::invalid_option("regularization.max_escalations", 0.0));
        }
        Ok(())
    }
}

/// Backtracking schedule and acceptance test for the forward pass.
///
/// Candidate step sizes follow the decreasing geometric sequence
/// `initial_step, initial_step * step_decay, ...` down to `minimum_step`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LineSearchOptions {
    /// First candidate step size.
    pub initial_step: f64,
    /// Geometric decay between consecutive candidates.
    pub step_decay: f64,
    /// Smallest candidate step size that is still tried.
    pub minimum_step: f64,
    /// Fraction of the model-predicted reduction that must be realized.
    pub sufficient_decrease: f64,
}

impl Default for LineSearchOptions {
    fn default() -> Self {
        Self {
            initial_step: 1.0,
            step_decay: 0.5,
            minimum_step: 1e-3,
            sufficient_decrease: 1e-4,
        }
    }
}

impl LineSearchOptions {
    fn validate(&self) -> Result<()> {
        if !(self.initial_step > 0.0) || !self.initial_step.is_finite() {
            return Err(IlqrError::invalid_option("line_search.initial_step", self.initial_step));
        }
        if !(self.step_decay > 0.0 && self.step_decay < 1.0) {
            return Err(IlqrError::invalid_option("line_search.step_decay", self.step_decay));
        }
        if !(self.minimum_step > 0.0 && self.minimum_step <= self.initial_step) {
            return Err(IlqrError::invalid_option("line_search.minimum_step", self.minimum_step));
        }
        if !(self.sufficient_decrease >= 0.0 && self.sufficient_decrease < 1.0) {
            return Err(IlqrError::invalid_option(
                "line_search.sufficient_decrease",
                self.sufficient_decrease,
            ));
        }
        Ok(())
    }
}

/// Aggregated configuration for one `solve` call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SolveOptions {
    /// Componentwise bound on every accepted control update.
    pub gradient_clip: f64,
    /// Maximum number of outer iterations.
    pub max_iterations: usize,
    /// Seed for the initial control sequence.
    pub initialization: Initialization,
    /// Converged once the cost improvement of an accepted step falls below this.
    pub cost_tolerance: f64,
    /// Converged once every feedforward component falls below this.
    pub feedforward_tolerance: f64,
    /// Perturbation magnitude for finite-difference Jacobians.
    pub finite_difference_step: f64,
    /// Distribute Jacobian estimation across timesteps with rayon.
    ///
    /// Requires nothing beyond the `Sync` bound the dynamics callback already
    /// carries; disable to evaluate the dynamics from a single thread.
    pub parallel_linearization: bool,
    /// Damping schedule for the backward pass.
    pub regularization: RegularizationOptions,
    /// Backtracking schedule for the forward pass.
    pub line_search: LineSearchOptions,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            gradient_clip: f64::INFINITY,
            max_iterations: 100,
            initialization: Initialization::default(),
            cost_tolerance: 1e-6,
            feedforward_tolerance: 1e-6,
            finite_difference_step: DEFAULT_STEP,
            parallel_linearization: true,
            regularization: RegularizationOptions::default(),
            line_search: LineSearchOptions::default(),
        }
    }
}

impl SolveOptions {
    /// Overrides the componentwise control-update bound.
    pub fn with_gradient_clip(mut self, gradient_clip: f64) -> Self {
        self.gradient_clip = gradient_clip;
        self
    }

    /// Overrides the outer iteration budget.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Overrides the initial control sequence seed.
    pub fn with_initialization(mut self, initialization: Initialization) -> Self {
        self.initialization = initialization;
        self
    }

    /// Overrides the cost-improvement convergence tolerance.
    pub fn with_cost_tolerance(mut self, cost_tolerance: f64) -> Self {
        self.cost_tolerance = cost_tolerance;
        self
    }

    /// Overrides the feedforward convergence tolerance.
    pub fn with_feedforward_tolerance(mut self, feedforward_tolerance: f64) -> Self {
        self.feedforward_tolerance = feedforward_tolerance;
        self
    }

    /// Overrides the finite-difference perturbation magnitude.
    pub fn with_finite_difference_step(mut self, step: f64) -> Self {
        self.finite_difference_step = step;
        self
    }

    /// Enables or disables rayon-parallel Jacobian estimation.
    pub fn with_parallel_linearization(mut self, parallel: bool) -> Self {
        self.parallel_linearization = parallel;
        self
    }

    /// Overrides the regularization schedule.
    pub fn with_regularization(mut self, regularization: RegularizationOptions) -> Self {
        self.regularization = regularization;
        self
    }

    /// Overrides the line-search schedule.
    pub fn with_line_search(mut self, line_search: LineSearchOptions) -> Self {
        self.line_search = line_search;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if !(self.gradient_clip > 0.0) {
            return Err(IlqrError::invalid_option("gradient_clip", self.gradient_clip));
        }
        if self.max_iterations == 0 {
            return Err(IlqrError::invalid_option("max_iterations", 0.0));
        }
        if !(self.cost_tolerance >= 0.0) || !self.cost_tolerance.is_finite() {
            return Err(IlqrError::invalid_option("cost_tolerance", self.cost_tolerance));
        }
        if !(self.feedforward_tolerance >= 0.0) || !self.feedforward_tolerance.is_finite() {
            return Err(IlqrError::invalid_option(
                "feedforward_tolerance",
                self.feedforward_tolerance,
            ));
        }
        if !(self.finite_difference_step > 0.0) || !self.finite_difference_step.is_finite() {
            return Err(IlqrError::invalid_option(
                "finite_difference_step",
                self.finite_difference_step,
            ));
        }
        self.regularization.validate()?;
        self.line_search.validate()
    }
}
