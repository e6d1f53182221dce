//! Finite-horizon iterative Linear-Quadratic Regulator (iLQR) for nonlinear
//! optimal control.
//!
//! Given an initial state, a target state, a black-box discrete-time dynamics
//! function, and quadratic state/control costs, the solver computes a control
//! sequence that drives the system toward the target while minimizing
//! accumulated cost. Each outer iteration
//!
//! - linearizes the dynamics along the current trajectory with central finite
//!   differences (`linearize` module),
//! - runs a backward Riccati recursion to obtain feedback gains and
//!   feedforward terms (`backward` module),
//! - rolls the dynamics forward through a backtracking line search
//!   (`forward` module), and
//! - adapts a damping term `mu` and checks convergence (`solver` module).
//!
//! The dynamics function only ever needs to be evaluable: no analytic
//! derivatives are required, and the solver never inspects its structure.
//!
//! # Quick start
//!
//! ```no_run
//! use ilqr::IlqrSolver;
//! use nalgebra::{DMatrix, DVector};
//!
//! // Double integrator: position and velocity driven by acceleration.
//! let q = DMatrix::identity(2, 2) * 0.1;
//! let qf = DMatrix::identity(2, 2) * 100.0;
//! let r = DMatrix::identity(1, 1) * 1e-3;
//! let solver = IlqrSolver::new(2, 1, q, qf, r).expect("valid cost matrices");
//!
//! let dt = 0.1;
//! let dynamics = move |x: &[f64], u: &[f64]| {
//!     DVector::from_vec(vec![x[0] + dt * x[1], x[1] + dt * u[0]])
//! };
//!
//! let initial = DVector::zeros(2);
//! let target = DVector::from_vec(vec![1.0, 0.0]);
//! let solution = solver
//!     .solve(&initial, &target, dynamics, 50)
//!     .expect("planning succeeded");
//! println!("{} controls, final cost {}", solution.controls.len(), solution.cost);
//! ```
//!
//! Tolerances, the initial control sequence, gradient clipping, and the
//! regularization and line-search schedules are configured through
//! [`SolveOptions`] and [`IlqrSolver::solve_with_options`].

pub mod backward;
pub mod cost;
pub mod error;
pub mod forward;
pub mod linearize;
pub mod options;
pub mod solver;

pub use error::{IlqrError, Result};
pub use options::{Initialization, LineSearchOptions, RegularizationOptions, SolveOptions};
pub use solver::{IlqrSolver, Solution, SolveSummary, TerminationReason};
