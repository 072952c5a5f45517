//! Discrete-time feedback loop dynamics.
//!
//! Reinforcing loops grow geometrically, balancing loops relax toward a
//! fixed target. Both use explicit forward-difference updates.

use crate::error::{AnalyticsError, Result};
use crate::schemas::{LoopType, ProblemRecord};
use crate::utils::math::population_variance;
use serde::{Deserialize, Serialize};

pub const DEFAULT_STEPS: usize = 50;
pub const MAX_STEPS: usize = 10_000;
const STABLE_BELOW: f64 = 0.1;
const MODERATE_BELOW: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Behavior {
    Stable,
    ModeratelyStable,
    Unstable,
}

impl Behavior {
    pub fn score(&self) -> f64 {
        match self {
            Behavior::Stable => 0.9,
            Behavior::ModeratelyStable => 0.6,
            Behavior::Unstable => 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stability {
    pub stability_score: f64,
    pub behavior: Behavior,
    pub variance: f64,
}

/// Verdict over total final-value variance; both thresholds are exclusive.
pub fn stability_verdict(variance: f64) -> Stability {
    let behavior = if variance < STABLE_BELOW {
        Behavior::Stable
    } else if variance < MODERATE_BELOW {
        Behavior::ModeratelyStable
    } else {
        Behavior::Unstable
    };
    Stability {
        stability_score: behavior.score(),
        behavior,
        variance,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortTrace {
    pub count: usize,
    /// One row per step, recorded after the update.
    pub history: Vec<Vec<f64>>,
    pub final_values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationTrace {
    pub time_points: Vec<f64>,
    pub reinforcing_loops: CohortTrace,
    pub balancing_loops: CohortTrace,
    pub system_stability: Stability,
}

#[derive(Debug, Clone)]
pub struct LoopDynamicsSimulator {
    pub dt: f64,
    pub growth_rate: f64,
    pub relaxation_rate: f64,
    pub target: f64,
    pub initial_value: f64,
}

impl Default for LoopDynamicsSimulator {
    fn default() -> Self {
        Self {
            dt: 0.1,
            growth_rate: 0.05,
            relaxation_rate: 0.03,
            target: 2.0,
            initial_value: 1.0,
        }
    }
}

impl LoopDynamicsSimulator {
    pub fn simulate(&self, problem: &ProblemRecord, steps: usize) -> Result<SimulationTrace> {
        if problem.feedback_loops.is_empty() {
            return Err(AnalyticsError::NoLoopsToSimulate);
        }
        if !(1..=MAX_STEPS).contains(&steps) {
            return Err(AnalyticsError::InvalidParams {
                message: format!("time_steps must be between 1 and {}, got {}", MAX_STEPS, steps),
            });
        }

        let n_reinforcing = problem
            .feedback_loops
            .iter()
            .filter(|l| l.kind == Some(LoopType::Reinforcing))
            .count();
        let n_balancing = problem.feedback_loops.len() - n_reinforcing;

        let mut reinforcing = vec![self.initial_value; n_reinforcing];
        let mut balancing = vec![self.initial_value; n_balancing];
        let mut r_history = Vec::with_capacity(steps);
        let mut b_history = Vec::with_capacity(steps);
        let growth = 1.0 + self.growth_rate * self.dt;
        let relax = self.relaxation_rate * self.dt;

        for _ in 0..steps {
            reinforcing.iter_mut().for_each(|x| *x *= growth);
            balancing
                .iter_mut()
                .for_each(|x| *x += (self.target - *x) * relax);
            r_history.push(reinforcing.clone());
            b_history.push(balancing.clone());
        }

        let variance = population_variance(&reinforcing) + population_variance(&balancing);
        tracing::debug!(
            "Simulated {} reinforcing / {} balancing loops over {} steps (variance={:.4})",
            n_reinforcing,
            n_balancing,
            steps,
            variance
        );

        Ok(SimulationTrace {
            time_points: (0..steps).map(|i| i as f64 * self.dt).collect(),
            reinforcing_loops: CohortTrace {
                count: n_reinforcing,
                history: r_history,
                final_values: reinforcing,
            },
            balancing_loops: CohortTrace {
                count: n_balancing,
                history: b_history,
                final_values: balancing,
            },
            system_stability: stability_verdict(variance),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_loops_is_an_error() {
        let err = LoopDynamicsSimulator::default()
            .simulate(&ProblemRecord::default(), 10)
            .unwrap_err();
        assert_eq!(err, AnalyticsError::NoLoopsToSimulate);
    }

    #[test]
    fn reinforcing_matches_closed_form() {
        let p = ProblemRecord::new("1", "t", "d").with_loop("l", LoopType::Reinforcing);
        let trace = LoopDynamicsSimulator::default().simulate(&p, 10).unwrap();
        let expected = 1.005f64.powi(10);
        assert!((trace.reinforcing_loops.final_values[0] - expected).abs() < 1e-12);
        assert!((expected - 1.05114).abs() < 1e-5);
        assert_eq!(trace.reinforcing_loops.history.len(), 10);
        assert_eq!(trace.time_points.len(), 10);
        assert!((trace.time_points[9] - 0.9).abs() < 1e-12);
        assert_eq!(trace.balancing_loops.count, 0);
    }

    #[test]
    fn balancing_matches_closed_form() {
        let p = ProblemRecord::new("1", "t", "d").with_loop("l", LoopType::Balancing);
        let trace = LoopDynamicsSimulator::default().simulate(&p, 10).unwrap();
        let expected = 2.0 - 0.997f64.powi(10);
        assert!((trace.balancing_loops.final_values[0] - expected).abs() < 1e-12);
        assert!((expected - 1.02956).abs() < 1e-5);
    }

    #[test]
    fn untyped_loops_join_balancing_cohort() {
        let mut p = ProblemRecord::new("1", "t", "d").with_loop("l", LoopType::Reinforcing);
        p.feedback_loops.push(Default::default());
        let trace = LoopDynamicsSimulator::default().simulate(&p, 5).unwrap();
        assert_eq!(trace.reinforcing_loops.count, 1);
        assert_eq!(trace.balancing_loops.count, 1);
    }

    #[test]
    fn loop_tags_are_matched_exactly() {
        let raw = r#"{"id": "1", "feedback_loops": [{"description": "l", "type": "Reinforcing"}]}"#;
        let p: ProblemRecord = serde_json::from_str(raw).unwrap();
        let trace = LoopDynamicsSimulator::default().simulate(&p, 10).unwrap();
        assert_eq!(trace.reinforcing_loops.count, 0);
        assert_eq!(trace.balancing_loops.count, 1);
        let expected = 2.0 - 0.997f64.powi(10);
        assert!((trace.balancing_loops.final_values[0] - expected).abs() < 1e-12);
    }

    #[test]
    fn step_count_is_bounded() {
        let p = ProblemRecord::new("1", "t", "d").with_loop("l", LoopType::Balancing);
        let sim = LoopDynamicsSimulator::default();
        assert_eq!(sim.simulate(&p, 0).unwrap_err().code(), "invalid_params");
        assert_eq!(sim.simulate(&p, MAX_STEPS + 1).unwrap_err().code(), "invalid_params");
        assert_eq!(sim.simulate(&p, MAX_STEPS).unwrap().time_points.len(), MAX_STEPS);
    }

    #[test]
    fn identical_loops_are_stable() {
        let p = ProblemRecord::new("1", "t", "d")
            .with_loop("a", LoopType::Reinforcing)
            .with_loop("b", LoopType::Reinforcing);
        let trace = LoopDynamicsSimulator::default().simulate(&p, 50).unwrap();
        assert_eq!(trace.system_stability.behavior, Behavior::Stable);
        assert_eq!(trace.system_stability.stability_score, 0.9);
    }

    #[test]
    fn stability_thresholds_are_exclusive() {
        assert_eq!(stability_verdict(0.0999).behavior, Behavior::Stable);
        assert_eq!(stability_verdict(0.1).behavior, Behavior::ModeratelyStable);
        assert_eq!(stability_verdict(0.9999).behavior, Behavior::ModeratelyStable);
        assert_eq!(stability_verdict(1.0).behavior, Behavior::Unstable);
        assert_eq!(stability_verdict(1.0).stability_score, 0.3);
    }

    #[test]
    fn zero_steps_rejected() {
        let p = ProblemRecord::new("1", "t", "d").with_loop("l", LoopType::Balancing);
        let err = LoopDynamicsSimulator::default().simulate(&p, 0).unwrap_err();
        assert_eq!(err.code(), "invalid_params");
    }
}
