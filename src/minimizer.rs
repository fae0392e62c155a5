//! Bounded minimization over the six joint angles.
//!
//! The inverse kinematics is posed as a smooth scalar cost over the joint box. Any
//! solver that honors the bounds and starts from the given seed can be plugged in via
//! [`BoundedMinimizer`]; [`ProjectedLbfgs`] is the one used by default. It is a
//! limited-memory quasi-Newton method where variables sitting on an active bound are
//! frozen for the step and every trial point is projected back into the box, so no
//! iterate ever leaves the limits.

use crate::constraints::Constraints;
use crate::kinematic_traits::Joints;
use nalgebra::Vector6;
use rayon::prelude::*;
use std::collections::VecDeque;

/// Cost function over joint angles. Must be defined everywhere, also outside of the bounds
/// (the numeric gradient probes slightly past them).
pub type Cost<'a> = dyn Fn(&Joints) -> f64 + Sync + 'a;

/// Outcome of a minimization. `x` always lies within the bounds, also when not converged.
#[derive(Debug, Clone, Copy)]
pub struct Minimum {
    pub x: Joints,
    pub value: f64,
    pub iterations: usize,
    pub converged: bool,
}

pub trait BoundedMinimizer: Send + Sync {
    fn minimize(&self, cost: &Cost, bounds: &Constraints, seed: &Joints) -> Minimum;
}

/// Projected limited-memory BFGS with backtracking Armijo line search.
#[derive(Debug, Clone)]
pub struct ProjectedLbfgs {
    /// Number of correction pairs kept.
    pub memory: usize,
    pub max_iterations: usize,
    /// Converged when the largest component of the projected gradient is below this.
    pub gradient_tolerance: f64,
    /// Converged when the relative cost decrease of a step falls below this.
    pub relative_tolerance: f64,
    /// Finite difference step, radians.
    pub difference_step: f64,
}

impl Default for ProjectedLbfgs {
    fn default() -> Self {
        ProjectedLbfgs {
            memory: 10,
            max_iterations: 500,
            gradient_tolerance: 1e-8,
            relative_tolerance: 1e-15,
            difference_step: 1e-6,
        }
    }
}

const ARMIJO: f64 = 1e-4;
const MAX_BACKTRACKS: usize = 60;
const CURVATURE_FLOOR: f64 = 1e-10;

/// Central difference gradient. Columns are independent and evaluated in parallel.
pub fn numeric_gradient(cost: &Cost, x: &Vector6<f64>, step: f64) -> Vector6<f64> {
    let columns: Vec<f64> = (0..6)
        .into_par_iter()
        .map(|i| {
            let mut plus: Joints = (*x).into();
            let mut minus: Joints = (*x).into();
            plus[i] += step;
            minus[i] -= step;
            (cost(&plus) - cost(&minus)) / (2.0 * step)
        })
        .collect();
    Vector6::from_column_slice(&columns)
}

fn project(x: &Vector6<f64>, bounds: &Constraints) -> Vector6<f64> {
    Vector6::from_fn(|i, _| x[i].clamp(bounds.from[i], bounds.to[i]))
}

/// Variables that may move: not pinned on a bound by a gradient pushing outwards.
fn free_variables(x: &Vector6<f64>, g: &Vector6<f64>, bounds: &Constraints) -> [bool; 6] {
    std::array::from_fn(|i| {
        !((x[i] <= bounds.from[i] && g[i] > 0.0) || (x[i] >= bounds.to[i] && g[i] < 0.0))
    })
}

fn masked(v: &Vector6<f64>, free: &[bool; 6]) -> Vector6<f64> {
    Vector6::from_fn(|i, _| if free[i] { v[i] } else { 0.0 })
}

impl ProjectedLbfgs {
    /// Two-loop recursion restricted to the free variables.
    fn direction(
        &self,
        pg: &Vector6<f64>,
        free: &[bool; 6],
        pairs: &VecDeque<(Vector6<f64>, Vector6<f64>)>,
    ) -> Vector6<f64> {
        let mut q = *pg;
        let mut alphas = Vec::with_capacity(pairs.len());
        for (s, y) in pairs.iter().rev() {
            let (sm, ym) = (masked(s, free), masked(y, free));
            let sy = sm.dot(&ym);
            if sy <= 1e-12 {
                alphas.push(None);
                continue;
            }
            let alpha = sm.dot(&q) / sy;
            q -= ym * alpha;
            alphas.push(Some((alpha, sm, ym, sy)));
        }

        let gamma = match pairs.back() {
            Some((s, y)) => s.dot(y) / y.dot(y),
            None => 1.0 / pg.norm().max(1.0),
        };
        let mut r = q * gamma;

        for entry in alphas.iter().rev() {
            if let Some((alpha, sm, ym, sy)) = entry {
                let beta = ym.dot(&r) / *sy;
                r += *sm * (*alpha - beta);
            }
        }
        -masked(&r, free)
    }
}

impl BoundedMinimizer for ProjectedLbfgs {
    fn minimize(&self, cost: &Cost, bounds: &Constraints, seed: &Joints) -> Minimum {
        let h = self.difference_step;
        let evaluate = |x: &Vector6<f64>| {
            let joints: Joints = (*x).into();
            cost(&joints)
        };

        let mut x = project(&Vector6::from_column_slice(seed), bounds);
        let mut fx = evaluate(&x);
        let mut g = numeric_gradient(cost, &x, h);
        let mut pairs: VecDeque<(Vector6<f64>, Vector6<f64>)> = VecDeque::with_capacity(self.memory);

        let finish = |x: Vector6<f64>, value: f64, iterations: usize, converged: bool| Minimum {
            x: x.into(),
            value,
            iterations,
            converged,
        };

        for iteration in 0..self.max_iterations {
            let free = free_variables(&x, &g, bounds);
            let pg = masked(&g, &free);
            if pg.amax() < self.gradient_tolerance {
                return finish(x, fx, iteration, true);
            }

            let mut d = self.direction(&pg, &free, &pairs);
            if d.dot(&g) >= 0.0 {
                // Not a descent direction, restart from steepest descent.
                d = -pg;
                pairs.clear();
            }

            let mut t = 1.0;
            let mut accepted = None;
            for _ in 0..MAX_BACKTRACKS {
                let candidate = project(&(x + d * t), bounds);
                let f_candidate = evaluate(&candidate);
                if f_candidate <= fx + ARMIJO * g.dot(&(candidate - x)) {
                    accepted = Some((candidate, f_candidate));
                    break;
                }
                t *= 0.5;
            }

            let Some((x_new, f_new)) = accepted else {
                return finish(x, fx, iteration, false);
            };

            let g_new = numeric_gradient(cost, &x_new, h);
            let s = x_new - x;
            let y = g_new - g;
            if s.dot(&y) > CURVATURE_FLOOR {
                if pairs.len() == self.memory {
                    pairs.pop_front();
                }
                pairs.push_back((s, y));
            }

            let stalled = fx - f_new <= self.relative_tolerance * fx.abs().max(f_new.abs()).max(1.0);
            x = x_new;
            fx = f_new;
            g = g_new;
            if stalled {
                return finish(x, fx, iteration + 1, true);
            }
        }
        finish(x, fx, self.max_iterations, false)
    }
}
