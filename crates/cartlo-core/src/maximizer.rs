//! # Maximizer
//!
//! Single-variable hill climb over a hardware control value. The dependent
//! value may be read back immediately or delivered later from another thread
//! through a [`Mailbox`].
//!
//! ```text
//!  commit(x) ──► request() ──► Ready(y) ─────────────┐
//!                     │                               ▼
//!                     └──► Pending ──► feed.wait ──► y ──► improved?
//!                                                         ├─ yes: x += dir·step
//!                                                         └─ no:  dir = -dir, next step
//! ```
//!
//! The search ends when the step schedule is exhausted (converged), when it
//! is pinned at a bound with the best point on that bound, at the iteration
//! cap, on oscillation, on timeout, or when stopped. No value outside
//! `[min, max]` is ever committed.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::error::{LoError, LoResult};
use crate::rt::{Mailbox, StopToken, WaitError};

/// Committed values kept for oscillation detection.
pub const OSCILLATION_HISTORY: usize = 5;

/// Dependent value of the most recent commit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Dependent {
    /// Available now
    Ready(f64),
    /// Will be posted to the maximizer's feed
    Pending,
}

/// The control and dependent value pair being maximized.
pub trait Objective {
    /// Write the control value to hardware.
    fn commit(&mut self, control: f64) -> LoResult<()>;

    /// Ask for the dependent value of the last commit.
    fn request(&mut self) -> LoResult<Dependent>;

    /// Called once per evaluated point.
    fn observe(&mut self, _control: f64, _dependent: f64) {}
}

/// Last few committed values; flags A-B-A-B-A patterns.
#[derive(Debug, Clone, Default)]
pub struct OscillationGuard {
    history: VecDeque<f64>,
}

impl OscillationGuard {
    pub fn new() -> Self {
        Self {
            history: VecDeque::with_capacity(OSCILLATION_HISTORY),
        }
    }

    /// Record a commit. Returns true when positions 0, 2 and 4 of the
    /// history are bit-identical.
    pub fn push(&mut self, value: f64) -> bool {
        if self.history.len() == OSCILLATION_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(value);
        self.is_oscillating()
    }

    pub fn is_oscillating(&self) -> bool {
        if self.history.len() < OSCILLATION_HISTORY {
            return false;
        }
        let first = self.history[0].to_bits();
        self.history[2].to_bits() == first && self.history[4].to_bits() == first
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

/// Initial search direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Up,
    Down,
}

impl Direction {
    fn sign(self) -> f64 {
        match self {
            Direction::Up => 1.0,
            Direction::Down => -1.0,
        }
    }

    fn reversed(self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }
}

/// Parameters of one maximization.
#[derive(Debug, Clone, PartialEq)]
pub struct MaximizerSettings {
    pub start: f64,
    pub min: f64,
    pub max: f64,
    /// Step amplitudes; the search advances one entry per reversal
    pub schedule: Vec<f64>,
    pub direction: Direction,
    /// Cap on commits after the starting point
    pub max_iterations: u32,
    /// Least increase counted as an improvement
    pub tolerance: f64,
    /// Wait for each pending dependent value
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl MaximizerSettings {
    /// Settings with a halving schedule of `levels` steps starting at `step`.
    pub fn new(start: f64, step: f64, min: f64, max: f64) -> Self {
        Self {
            start,
            min,
            max,
            schedule: geometric_schedule(step, 0.5, 3),
            direction: Direction::Up,
            max_iterations: 60,
            tolerance: 0.0,
            timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(20),
        }
    }

    fn validate(&self) -> LoResult<()> {
        if !(self.min <= self.max) {
            return Err(LoError::InvalidArgument(format!(
                "maximizer bounds [{}, {}]",
                self.min, self.max
            )));
        }
        if self.schedule.is_empty() || self.schedule.iter().any(|s| !(*s > 0.0)) {
            return Err(LoError::InvalidArgument(
                "maximizer step schedule must be non-empty and positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// `levels` step sizes starting at `step`, each `factor` times the previous.
pub fn geometric_schedule(step: f64, factor: f64, levels: usize) -> Vec<f64> {
    std::iter::successors(Some(step), |s| Some(s * factor))
        .take(levels.max(1))
        .collect()
}

/// How a maximization ended.
#[derive(Debug, Clone, PartialEq)]
pub enum MaximizeOutcome {
    /// Step schedule exhausted around an interior maximum
    Converged,
    /// Pinned at a bound that holds the best value seen
    BoundReached { at_max: bool },
    /// Iteration cap hit before convergence
    IterationLimit,
    /// Committed values started repeating A-B-A-B-A
    Oscillation,
    /// Dependent value did not arrive in time
    Timeout,
    /// Stop was requested
    Stopped,
    /// A commit or readback failed
    Failed(LoError),
}

impl MaximizeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, MaximizeOutcome::Converged)
    }

    pub fn label(&self) -> &'static str {
        match self {
            MaximizeOutcome::Converged => "converged",
            MaximizeOutcome::BoundReached { .. } => "bound reached",
            MaximizeOutcome::IterationLimit => "iteration limit",
            MaximizeOutcome::Oscillation => "oscillation",
            MaximizeOutcome::Timeout => "timeout",
            MaximizeOutcome::Stopped => "stopped",
            MaximizeOutcome::Failed(_) => "failed",
        }
    }
}

/// Result of [`Maximizer::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct MaximizeResult {
    pub outcome: MaximizeOutcome,
    /// Control value with the highest dependent value seen
    pub best_control: f64,
    /// Highest dependent value seen; NaN if none was read
    pub best_value: f64,
    /// Control value left committed in hardware
    pub final_control: f64,
    /// Commits after the starting point
    pub iterations: u32,
}

enum Step {
    Value(f64),
    End(MaximizeOutcome),
}

/// Hill-climbing engine.
#[derive(Debug, Clone)]
pub struct Maximizer {
    settings: MaximizerSettings,
    feed: Option<Arc<Mailbox<f64>>>,
    stop: StopToken,
}

impl Maximizer {
    pub fn new(settings: MaximizerSettings) -> Self {
        Self {
            settings,
            feed: None,
            stop: StopToken::new(),
        }
    }

    /// Mailbox that pending dependent values arrive on.
    pub fn with_feed(mut self, feed: Arc<Mailbox<f64>>) -> Self {
        self.feed = Some(feed);
        self
    }

    pub fn with_stop(mut self, stop: StopToken) -> Self {
        self.stop = stop;
        self
    }

    pub fn settings(&self) -> &MaximizerSettings {
        &self.settings
    }

    fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.settings.min, self.settings.max)
    }

    fn sample(&self, objective: &mut dyn Objective) -> Step {
        match objective.request() {
            Ok(Dependent::Ready(value)) => Step::Value(value),
            Ok(Dependent::Pending) => {
                let Some(feed) = self.feed.as_ref() else {
                    return Step::End(MaximizeOutcome::Failed(LoError::InvalidArgument(
                        "pending dependent value without a feed".to_string(),
                    )));
                };
                match feed.wait_take(self.settings.timeout, self.settings.poll_interval, &self.stop)
                {
                    Ok(value) => Step::Value(value),
                    Err(WaitError::Timeout) => Step::End(MaximizeOutcome::Timeout),
                    Err(WaitError::Stopped) | Err(WaitError::Closed) => {
                        Step::End(MaximizeOutcome::Stopped)
                    }
                }
            }
            Err(e) => Step::End(MaximizeOutcome::Failed(e)),
        }
    }

    /// Commit, record in the guard, then read the dependent value.
    fn evaluate(
        &self,
        control: f64,
        objective: &mut dyn Objective,
        guard: &mut Option<&mut OscillationGuard>,
    ) -> Step {
        if let Err(e) = objective.commit(control) {
            return Step::End(MaximizeOutcome::Failed(e));
        }
        if let Some(g) = guard.as_deref_mut() {
            if g.push(control) {
                return Step::End(MaximizeOutcome::Oscillation);
            }
        }
        let step = self.sample(objective);
        if let Step::Value(y) = step {
            objective.observe(control, y);
        }
        step
    }

    /// Run the search. Commits go through `objective`; `guard` (if any)
    /// sees every commit including the starting point.
    pub fn run(
        &self,
        objective: &mut dyn Objective,
        mut guard: Option<&mut OscillationGuard>,
    ) -> MaximizeResult {
        let s = &self.settings;
        let mut result = MaximizeResult {
            outcome: MaximizeOutcome::Converged,
            best_control: s.start,
            best_value: f64::NAN,
            final_control: s.start,
            iterations: 0,
        };

        // Bounds are checked before any clamp; `f64::clamp` panics on inverted bounds.
        if let Err(e) = s.validate() {
            result.outcome = MaximizeOutcome::Failed(e);
            return result;
        }
        let mut position = self.clamp(s.start);
        result.best_control = position;
        result.final_control = position;
        if self.stop.is_stopped() {
            result.outcome = MaximizeOutcome::Stopped;
            return result;
        }

        let mut previous = match self.evaluate(position, objective, &mut guard) {
            Step::Value(y) => y,
            Step::End(outcome) => {
                result.outcome = outcome;
                return result;
            }
        };
        result.best_value = previous;

        let mut direction = s.direction;
        let mut level = 0usize;

        let outcome = loop {
            if self.stop.is_stopped() {
                break MaximizeOutcome::Stopped;
            }
            if result.iterations >= s.max_iterations {
                break MaximizeOutcome::IterationLimit;
            }

            let next = self.clamp(position + direction.sign() * s.schedule[level]);
            if next == position {
                // Pinned at a bound
                if result.best_control == position {
                    break MaximizeOutcome::BoundReached {
                        at_max: position >= s.max,
                    };
                }
                direction = direction.reversed();
                level += 1;
                if level >= s.schedule.len() {
                    break MaximizeOutcome::Converged;
                }
                continue;
            }

            result.iterations += 1;
            let value = match self.evaluate(next, objective, &mut guard) {
                Step::Value(y) => y,
                Step::End(outcome) => {
                    position = next;
                    break outcome;
                }
            };
            position = next;
            trace!(control = position, value, level, "maximizer sample");

            if value > result.best_value {
                result.best_value = value;
                result.best_control = position;
            }

            if value <= previous + s.tolerance {
                direction = direction.reversed();
                level += 1;
                if level >= s.schedule.len() {
                    break MaximizeOutcome::Converged;
                }
            }
            previous = value;
        };

        result.final_control = position;

        // Leave the best point committed after a clean finish.
        if outcome.is_success() && position != result.best_control {
            match objective.commit(result.best_control) {
                Ok(()) => result.final_control = result.best_control,
                Err(e) => {
                    result.outcome = MaximizeOutcome::Failed(e);
                    return result;
                }
            }
        }

        debug!(
            outcome = outcome.label(),
            best = result.best_control,
            value = result.best_value,
            iterations = result.iterations,
            "maximizer finished"
        );
        result.outcome = outcome;
        result
    }
}
