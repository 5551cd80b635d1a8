//! Stochastic hill-climbing over the tunable registry.
//!
//! All mutable search state lives in one [`OptimizationState`]. Every strict
//! improvement of the best score is handed to a [`CheckpointSink`] before the
//! search continues; a sink failure ends the run with
//! [`CalibrationError::Persist`].
//!
//! Acceptance rules per iteration:
//! - stagnation counter at threshold: burst-perturb several tunables and
//!   take the result as the new current point unconditionally
//! - otherwise perturb one tunable; keep it when it beats the current score,
//!   or lands within `tie_tolerance` of it (lateral move)
//! - the stagnation counter resets only on a new best
//!
//! The single-step size adapts: it grows by `step_growth` after a move that
//! beats the current score, shrinks by `step_shrink` after a rejected move,
//! stays within `[min_step, max_step]`, and returns to `step_magnitude`
//! after a burst. Lateral moves leave it unchanged.

use std::collections::{BTreeSet, VecDeque};
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use rand::rngs::SmallRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::calibrate::Objective;
use crate::error::CalibrationError;
use crate::params::{Group, ParameterSet, Tunable, tunables};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Initial single-step size as a fraction of a tunable's range.
    pub step_magnitude: f64,
    pub step_growth: f64,
    pub step_shrink: f64,
    pub min_step: f64,
    pub max_step: f64,
    pub tie_tolerance: f64,
    /// Non-improving iterations before a burst.
    pub stagnation_threshold: usize,
    /// Burst size as a fraction of a tunable's range.
    pub burst_magnitude: f64,
    /// Tunables perturbed per burst.
    pub burst_width: usize,
    pub history_limit: usize,
    pub max_iterations: usize,
    pub target_score: f64,
    pub seed: Option<u64>,
    pub locked: BTreeSet<Group>,
    /// Individually pinned tunables, by dotted name.
    pub pinned: BTreeSet<String>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            step_magnitude: 0.1,
            step_growth: 1.5,
            step_shrink: 0.8,
            min_step: 0.001,
            max_step: 0.5,
            tie_tolerance: 1e-9,
            stagnation_threshold: 50,
            burst_magnitude: 0.25,
            burst_width: 4,
            history_limit: 256,
            max_iterations: 1000,
            target_score: 1.0,
            seed: None,
            locked: BTreeSet::new(),
            pinned: BTreeSet::new(),
        }
    }
}

impl OptimizerConfig {
    /// Tunables the search may move.
    pub fn free_tunables(&self) -> Vec<&'static Tunable> {
        tunables()
            .filter(|t| !self.locked.contains(&t.group) && !self.pinned.contains(t.name))
            .filter(|t| t.span() > 0.0)
            .collect()
    }

    fn clamp_step(&self, step: f64) -> f64 {
        step.clamp(self.min_step.min(self.max_step), self.max_step)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoveKind {
    Step,
    Burst,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub iteration: usize,
    pub kind: MoveKind,
    /// Step size of the move, as a fraction of a tunable's range.
    pub step: f64,
    /// Applied (post-clamp) change per tunable.
    pub deltas: Vec<(String, f64)>,
    pub score: f64,
    pub accepted: bool,
}

#[derive(Clone, Debug)]
pub struct OptimizationState {
    pub best: ParameterSet,
    pub best_score: f64,
    pub current: ParameterSet,
    pub current_score: f64,
    pub iteration: usize,
    pub stagnation: usize,
    pub bursts: usize,
    /// Current single-step size.
    pub step_scale: f64,
    history: VecDeque<HistoryEntry>,
    history_limit: usize,
}

impl OptimizationState {
    pub fn new(initial: ParameterSet, score: f64, step: f64, history_limit: usize) -> Self {
        let history_limit = history_limit.max(1);
        Self {
            best: initial.clone(),
            best_score: score,
            current: initial,
            current_score: score,
            iteration: 0,
            stagnation: 0,
            bursts: 0,
            step_scale: step,
            history: VecDeque::with_capacity(history_limit),
            history_limit,
        }
    }

    fn record(&mut self, entry: HistoryEntry) {
        if self.history.len() >= self.history_limit {
            self.history.pop_front();
        }
        self.history.push_back(entry);
    }

    /// Most recent moves, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.history.iter()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    TargetReached,
    IterationCap,
    Cancelled,
    NoFreeTunables,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            StopReason::TargetReached => "target_reached",
            StopReason::IterationCap => "iteration_cap",
            StopReason::Cancelled => "cancelled",
            StopReason::NoFreeTunables => "no_free_tunables",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type SinkError = Box<dyn Error + Send + Sync>;

/// Durable destination for best-so-far parameters.
pub trait CheckpointSink {
    /// Called with the state right after the best score strictly improved.
    fn checkpoint(&mut self, state: &OptimizationState) -> Result<(), SinkError>;

    /// Called once when the search ends without error.
    fn finish(&mut self, _state: &OptimizationState, _reason: StopReason) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Sink that keeps nothing.
pub struct NullSink;

impl CheckpointSink for NullSink {
    fn checkpoint(&mut self, _state: &OptimizationState) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Cooperative stop signal, polled between iterations.
pub trait Cancellation {
    fn is_cancelled(&self) -> bool;
}

impl Cancellation for AtomicBool {
    fn is_cancelled(&self) -> bool {
        self.load(Ordering::Relaxed)
    }
}

impl<F: Fn() -> bool> Cancellation for F {
    fn is_cancelled(&self) -> bool {
        self()
    }
}

#[derive(Clone, Debug)]
pub struct Outcome {
    pub state: OptimizationState,
    pub reason: StopReason,
}

fn perturb(
    params: &mut ParameterSet,
    tunable: &Tunable,
    magnitude: f64,
    rng: &mut SmallRng,
) -> (String, f64) {
    let before = tunable.get(params);
    let delta = rng.random_range(-1.0..=1.0) * magnitude * tunable.span();
    tunable.set(params, before + delta);
    (tunable.name.to_string(), tunable.get(params) - before)
}

fn persist<S: CheckpointSink + ?Sized>(
    sink: &mut S,
    state: &OptimizationState,
) -> Result<(), CalibrationError> {
    sink.checkpoint(state).map_err(CalibrationError::Persist)
}

/// Climb `objective` from `initial` until the target score, the iteration
/// cap or cancellation.
pub fn optimize<O, S, C>(
    initial: ParameterSet,
    objective: &O,
    config: &OptimizerConfig,
    sink: &mut S,
    cancel: &C,
) -> Result<Outcome, CalibrationError>
where
    O: Objective + ?Sized,
    S: CheckpointSink + ?Sized,
    C: Cancellation + ?Sized,
{
    let mut rng = match config.seed {
        Some(seed) => SmallRng::seed_from_u64(seed),
        None => SmallRng::from_os_rng(),
    };
    let free = config.free_tunables();

    let initial = initial.clamped();
    let score = objective.score(&initial);
    let step = config.clamp_step(config.step_magnitude);
    let mut state = OptimizationState::new(initial, score, step, config.history_limit);
    info!(score, free = free.len(), "calibration started");
    persist(sink, &state)?;

    let reason = loop {
        if state.best_score >= config.target_score {
            break StopReason::TargetReached;
        }
        if free.is_empty() {
            break StopReason::NoFreeTunables;
        }
        if state.iteration >= config.max_iterations {
            break StopReason::IterationCap;
        }
        if cancel.is_cancelled() {
            break StopReason::Cancelled;
        }
        state.iteration += 1;

        if state.stagnation >= config.stagnation_threshold {
            let width = config.burst_width.clamp(1, free.len());
            let mut candidate = state.current.clone();
            let deltas: Vec<(String, f64)> = sample(&mut rng, free.len(), width)
                .into_iter()
                .map(|i| perturb(&mut candidate, free[i], config.burst_magnitude, &mut rng))
                .collect();
            let score = objective.score(&candidate);
            warn!(
                iteration = state.iteration,
                stagnation = state.stagnation,
                score,
                "stagnation burst"
            );
            state.current = candidate;
            state.current_score = score;
            state.stagnation = 0;
            state.bursts += 1;
            state.step_scale = config.clamp_step(config.step_magnitude);
            if score > state.best_score {
                state.best = state.current.clone();
                state.best_score = score;
                persist(sink, &state)?;
            }
            state.record(HistoryEntry {
                iteration: state.iteration,
                kind: MoveKind::Burst,
                step: config.burst_magnitude,
                deltas,
                score,
                accepted: true,
            });
            continue;
        }

        let tunable = free[rng.random_range(0..free.len())];
        let mut candidate = state.current.clone();
        let step = state.step_scale;
        let delta = perturb(&mut candidate, tunable, step, &mut rng);
        let score = objective.score(&candidate);

        let accepted = if score > state.current_score {
            state.current = candidate;
            state.current_score = score;
            state.step_scale = config.clamp_step(step * config.step_growth);
            true
        } else if (score - state.current_score).abs() <= config.tie_tolerance {
            state.current = candidate;
            state.current_score = score;
            true
        } else {
            state.step_scale = config.clamp_step(step * config.step_shrink);
            false
        };

        if accepted && state.current_score > state.best_score {
            state.best = state.current.clone();
            state.best_score = state.current_score;
            state.stagnation = 0;
            debug!(iteration = state.iteration, score = state.best_score, "new best");
            persist(sink, &state)?;
        } else {
            state.stagnation += 1;
        }
        state.record(HistoryEntry {
            iteration: state.iteration,
            kind: MoveKind::Step,
            step,
            deltas: vec![delta],
            score,
            accepted,
        });
    };

    info!(
        reason = %reason,
        iterations = state.iteration,
        best = state.best_score,
        "calibration finished"
    );
    sink.finish(&state, reason)
        .map_err(CalibrationError::Persist)?;
    Ok(Outcome { state, reason })
}
