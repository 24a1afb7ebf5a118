//! Progress Simulator: cosmetic progress for remote operations that report no
//! intermediate state. Real completion always comes from outside through
//! `complete()` or `time_out()`.

use serde::Serialize;
use std::time::Duration;

use crate::aggregate::percent;

const ONE_SECOND: Duration = Duration::from_secs(1);
const CURVE_CEILING: f64 = 97.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SimState {
    #[default]
    Idle,
    Running,
    Holding,
    Completed,
    TimedOut,
}

impl SimState {
    pub fn is_active(self) -> bool {
        matches!(self, SimState::Running | SimState::Holding)
    }
}

/// A nominal step: label plus the delay before it is shown as done
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub label: String,
    pub duration: Duration,
}

impl Step {
    pub fn new(label: impl Into<String>, millis: u64) -> Self {
        Self {
            label: label.into(),
            duration: Duration::from_millis(millis),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepView {
    pub label: String,
    pub done: bool,
    pub active: bool,
}

/// What a progress view renders at one instant
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressView {
    pub state: SimState,
    pub percent: u32,
    pub label: String,
    pub elapsed_secs: u64,
    pub steps: Vec<StepView>,
}

/// Common driver interface so the display ticker does not care which variant runs.
pub trait ProgressModel: Send {
    fn start(&mut self);
    fn tick(&mut self, dt: Duration);
    fn complete(&mut self) -> bool;
    fn time_out(&mut self) -> bool;
    fn view(&self) -> ProgressView;
}

/// The page-audit step list.
pub fn audit_steps() -> Vec<Step> {
    vec![
        Step::new("Fetching & analyzing page", 1200),
        Step::new("Checking meta tags", 600),
        Step::new("Analyzing heading structure", 600),
        Step::new("Scanning structured data", 700),
        Step::new("Finding FAQ content", 500),
        Step::new("Checking images & alt text", 600),
        Step::new("Checking robots.txt & llms.txt", 700),
        Step::new("Measuring Core Web Vitals", 4000),
        Step::new("AI content analysis", 5000),
        Step::new("Citation potential assessment", 3500),
        Step::new("Analyzing E-E-A-T signals", 3500),
        Step::new("Generating commercial prompt", 2500),
        Step::new("Running live Perplexity test", 10000),
        Step::new("Calculating final scores", 800),
    ]
}

/// Sequential step display that parks on the last step until told otherwise.
#[derive(Debug, Clone)]
pub struct StepSimulator {
    steps: Vec<Step>,
    state: SimState,
    index: usize,
    in_step: Duration,
    elapsed: Duration,
}

impl StepSimulator {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            state: SimState::Idle,
            index: 0,
            in_step: Duration::ZERO,
            elapsed: Duration::ZERO,
        }
    }

    pub fn state(&self) -> SimState {
        self.state
    }

    pub fn step_index(&self) -> usize {
        self.index
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.elapsed.as_secs()
    }

    fn last_index(&self) -> usize {
        self.steps.len().saturating_sub(1)
    }

    pub fn reset(&mut self) {
        self.state = SimState::Idle;
        self.index = 0;
        self.in_step = Duration::ZERO;
        self.elapsed = Duration::ZERO;
    }
}

impl ProgressModel for StepSimulator {
    fn start(&mut self) {
        self.reset();
        self.state = if self.index >= self.last_index() {
            SimState::Holding
        } else {
            SimState::Running
        };
    }

    fn tick(&mut self, dt: Duration) {
        if !self.state.is_active() {
            return;
        }
        self.elapsed += dt;
        if self.state == SimState::Holding {
            return;
        }

        self.in_step += dt;
        while self.state == SimState::Running && self.in_step >= self.steps[self.index].duration {
            self.in_step -= self.steps[self.index].duration;
            self.index += 1;
            if self.index >= self.last_index() {
                self.state = SimState::Holding;
            }
        }
    }

    fn complete(&mut self) -> bool {
        if !self.state.is_active() {
            return false;
        }
        self.state = SimState::Completed;
        self.index = self.steps.len();
        true
    }

    fn time_out(&mut self) -> bool {
        if !self.state.is_active() {
            return false;
        }
        self.state = SimState::TimedOut;
        true
    }

    fn view(&self) -> ProgressView {
        let total = self.steps.len() as u32;
        let done = (self.index as u32).min(total);
        let percent = match self.state {
            SimState::Completed => 100,
            _ => percent(done, total).min(99),
        };
        let label = self
            .steps
            .get(self.index.min(self.last_index()))
            .map(|s| s.label.clone())
            .unwrap_or_default();

        ProgressView {
            state: self.state,
            percent,
            label,
            elapsed_secs: self.elapsed_secs(),
            steps: self
                .steps
                .iter()
                .enumerate()
                .map(|(i, step)| StepView {
                    label: step.label.clone(),
                    done: i < self.index,
                    active: self.state.is_active() && i == self.index,
                })
                .collect(),
        }
    }
}

/// Smoothed percentage for the prompt scan: fast at first, then slower,
/// parked at 97 until the real result arrives.
#[derive(Debug, Clone)]
pub struct CurveProgress {
    value: f64,
    state: SimState,
    total_prompts: usize,
    pending: Duration,
    elapsed: Duration,
}

impl CurveProgress {
    pub fn new(total_prompts: usize) -> Self {
        Self {
            value: 0.0,
            state: SimState::Idle,
            total_prompts: total_prompts.max(1),
            pending: Duration::ZERO,
            elapsed: Duration::ZERO,
        }
    }

    pub fn state(&self) -> SimState {
        self.state
    }

    pub fn percent(&self) -> u32 {
        self.value.floor() as u32
    }

    fn step_once(&mut self) {
        let rounded = self.value.floor();
        if rounded >= CURVE_CEILING {
            self.value = rounded;
            self.state = SimState::Holding;
            return;
        }
        self.value += match rounded as u32 {
            0..=9 => 2.0,
            10..=24 => 1.0,
            25..=49 => 0.6,
            50..=69 => 0.4,
            70..=84 => 0.25,
            85..=91 => 0.15,
            _ => 0.08,
        };
    }

    fn prompt_at(&self, rounded: u32, offset: u32) -> usize {
        let n = ((rounded - offset) as f64 / 3.5).floor() as usize + 1;
        n.min(self.total_prompts)
    }

    /// Phase text derived from the displayed percentage.
    pub fn label(&self) -> String {
        let rounded = self.percent();
        let total = self.total_prompts;
        match (self.state, rounded) {
            (SimState::Completed, _) => "Scan complete".to_string(),
            (SimState::TimedOut, _) => "Still running in the background".to_string(),
            (_, 0..=4) => "Preparing prompts...".to_string(),
            (_, 5..=14) => "Scanning ChatGPT...".to_string(),
            (_, 15..=49) => format!("ChatGPT: analyzing prompt {}/{}...", self.prompt_at(rounded, 15), total),
            (_, 50..=54) => "Scanning Perplexity...".to_string(),
            (_, 55..=89) => format!("Perplexity: analyzing prompt {}/{}...", self.prompt_at(rounded, 55), total),
            _ => "Processing results and analyzing competitors...".to_string(),
        }
    }
}

impl ProgressModel for CurveProgress {
    fn start(&mut self) {
        *self = CurveProgress::new(self.total_prompts);
        self.state = SimState::Running;
    }

    fn tick(&mut self, dt: Duration) {
        if !self.state.is_active() {
            return;
        }
        self.elapsed += dt;
        self.pending += dt;
        while self.pending >= ONE_SECOND {
            self.pending -= ONE_SECOND;
            self.step_once();
        }
    }

    fn complete(&mut self) -> bool {
        if !self.state.is_active() {
            return false;
        }
        self.value = 100.0;
        self.state = SimState::Completed;
        true
    }

    fn time_out(&mut self) -> bool {
        if !self.state.is_active() {
            return false;
        }
        self.state = SimState::TimedOut;
        true
    }

    fn view(&self) -> ProgressView {
        ProgressView {
            state: self.state,
            percent: self.percent(),
            label: self.label(),
            elapsed_secs: self.elapsed.as_secs(),
            steps: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[test]
    fn steps_advance_then_hold_on_last() {
        let mut sim = StepSimulator::new(audit_steps());
        assert_eq!(sim.state(), SimState::Idle);
        sim.start();
        assert_eq!(sim.state(), SimState::Running);

        sim.tick(ms(1199));
        assert_eq!(sim.step_index(), 0);
        sim.tick(ms(1));
        assert_eq!(sim.step_index(), 1);

        // Long gap: several steps at once, never past the last one.
        sim.tick(Duration::from_secs(600));
        assert_eq!(sim.state(), SimState::Holding);
        assert_eq!(sim.step_index(), 13);
        assert_eq!(sim.view().label, "Calculating final scores");
        assert_eq!(sim.elapsed_secs(), 601);

        sim.tick(Duration::from_secs(60));
        assert_eq!(sim.step_index(), 13);
        assert_eq!(sim.elapsed_secs(), 661);
        assert!(sim.view().percent < 100);
    }

    #[test]
    fn holding_waits_for_external_signal() {
        let mut sim = StepSimulator::new(vec![Step::new("a", 100), Step::new("b", 100)]);
        sim.start();
        sim.tick(ms(100));
        assert_eq!(sim.state(), SimState::Holding);

        assert!(sim.complete());
        let view = sim.view();
        assert_eq!(view.state, SimState::Completed);
        assert_eq!(view.percent, 100);
        assert!(view.steps.iter().all(|s| s.done));

        // Terminal: later signals are ignored.
        assert!(!sim.time_out());
        assert_eq!(sim.state(), SimState::Completed);
    }

    #[test]
    fn timeout_and_reset() {
        let mut sim = StepSimulator::new(audit_steps());
        assert!(!sim.complete());
        sim.start();
        sim.tick(ms(2500));
        assert!(sim.time_out());
        assert_eq!(sim.state(), SimState::TimedOut);

        sim.reset();
        assert_eq!(sim.state(), SimState::Idle);
        assert_eq!(sim.step_index(), 0);
        assert_eq!(sim.elapsed_secs(), 0);
    }

    #[test]
    fn single_step_holds_immediately() {
        let mut sim = StepSimulator::new(vec![Step::new("only", 500)]);
        sim.start();
        assert_eq!(sim.state(), SimState::Holding);
    }

    #[test]
    fn curve_is_monotonic_and_stays_below_100() {
        let mut curve = CurveProgress::new(10);
        curve.start();
        let mut last = 0;
        for _ in 0..3600 {
            curve.tick(ONE_SECOND);
            let now = curve.percent();
            assert!(now >= last);
            assert!(now < 100);
            last = now;
        }
        assert_eq!(last, 97);
        assert_eq!(curve.state(), SimState::Holding);

        assert!(curve.complete());
        assert_eq!(curve.percent(), 100);
    }

    #[test]
    fn curve_increments_slow_down() {
        let mut curve = CurveProgress::new(10);
        curve.start();
        curve.tick(Duration::from_secs(5));
        assert_eq!(curve.percent(), 10);
        curve.tick(Duration::from_secs(15));
        assert_eq!(curve.percent(), 25);
        // Sub-second ticks accumulate.
        curve.tick(ms(500));
        assert_eq!(curve.percent(), 25);
        curve.tick(ms(500));
        assert_eq!(curve.percent(), 25);
        curve.tick(ONE_SECOND);
        assert_eq!(curve.percent(), 26);
    }

    #[test]
    fn curve_labels_follow_percent() {
        let mut curve = CurveProgress::new(10);
        assert_eq!(curve.label(), "Preparing prompts...");
        curve.start();
        curve.tick(Duration::from_secs(3));
        assert_eq!(curve.label(), "Scanning ChatGPT...");
        curve.tick(Duration::from_secs(10));
        // 18%
        assert_eq!(curve.label(), "ChatGPT: analyzing prompt 1/10...");
        curve.tick(Duration::from_secs(600));
        assert_eq!(curve.label(), "Processing results and analyzing competitors...");
        curve.time_out();
        assert_eq!(curve.view().state, SimState::TimedOut);
    }
}
