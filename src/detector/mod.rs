//! Detector - Confidence Smoothing and Hysteresis State Machine
//!
//! ## Responsibilities
//!
//! - Temporal smoothing of raw per-frame classifier scores
//! - Hysteresis counter with asymmetric escalation/decay
//! - MONITORING / WARNING / ALERT state decisions
//! - The `incident_signal` that opens and closes incidents
//!
//! The state machine is pure per-frame logic; the caller injects the
//! clock so cooldown behavior is deterministic under test.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Bounded-history running average over raw classifier scores.
///
/// Damps single-frame spikes; the mean is only defined once at least one
/// sample has been pushed, so the machine treats pre-fill as non-violent.
#[derive(Debug)]
pub struct ConfidenceSmoother {
    history: VecDeque<f32>,
    capacity: usize,
}

impl ConfidenceSmoother {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "smoother needs at least one slot");
        Self {
            history: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push a raw sample and return the smoothed value.
    pub fn push(&mut self, raw: f32) -> f32 {
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(raw);

        let sum: f32 = self.history.iter().sum();
        sum / self.history.len() as f32
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

/// Detection state; exactly one current value at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionState {
    Monitoring,
    Warning,
    Alert,
}

impl DetectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionState::Monitoring => "monitoring",
            DetectionState::Warning => "warning",
            DetectionState::Alert => "alert",
        }
    }
}

/// Tunables for the state machine
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Smoothing window size (raw samples)
    pub history_size: usize,
    /// Smoothed confidence above this counts as violence
    pub violence_threshold: f32,
    /// Smoothed confidence above this reports WARNING
    pub warning_threshold: f32,
    /// Smoothed confidence above this escalates straight to ALERT
    pub alert_confidence_threshold: f32,
    /// Hysteresis counter level that triggers the counter-path ALERT
    pub counter_threshold: f32,
    /// Counter decrement per non-violent frame (slower than the +1 climb)
    pub counter_decrement: f32,
    /// Minimum interval between counter-path ALERTs
    pub alert_cooldown: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            history_size: 10,
            violence_threshold: 0.50,
            warning_threshold: 0.70,
            alert_confidence_threshold: 0.85,
            counter_threshold: 40.0,
            counter_decrement: 0.5,
            alert_cooldown: Duration::from_secs(60),
        }
    }
}

/// Per-frame decision
#[derive(Debug, Clone, Copy)]
pub struct DetectionOutput {
    pub state: DetectionState,
    pub smoothed: f32,
    /// True iff state == ALERT; the one boolean that drives the
    /// incident recorder. WARNING never opens an incident.
    pub incident_signal: bool,
}

/// Hysteresis state machine over smoothed confidence.
#[derive(Debug)]
pub struct DetectionStateMachine {
    config: DetectorConfig,
    smoother: ConfidenceSmoother,
    counter: f32,
    last_alert_at: Option<Instant>,
    state: DetectionState,
}

impl DetectionStateMachine {
    pub fn new(config: DetectorConfig) -> Self {
        let smoother = ConfidenceSmoother::new(config.history_size);
        Self {
            config,
            smoother,
            counter: 0.0,
            last_alert_at: None,
            state: DetectionState::Monitoring,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DetectorConfig::default())
    }

    /// Feed one raw classifier score using the wall clock.
    pub fn observe(&mut self, raw: f32) -> DetectionOutput {
        self.observe_at(raw, Instant::now())
    }

    /// Feed one raw classifier score at an explicit instant.
    pub fn observe_at(&mut self, raw: f32, now: Instant) -> DetectionOutput {
        let raw = raw.clamp(0.0, 1.0);
        let smoothed = self.smoother.push(raw);

        let is_violence = smoothed > self.config.violence_threshold;
        let is_warning = smoothed > self.config.warning_threshold;
        let is_alert_confidence = smoothed > self.config.alert_confidence_threshold;

        if is_violence {
            self.counter += 1.0;
        } else {
            // De-escalate more slowly than we escalate; never below zero.
            self.counter = (self.counter - self.config.counter_decrement).max(0.0);
        }

        let cooldown_elapsed = match self.last_alert_at {
            Some(at) => now.duration_since(at) > self.config.alert_cooldown,
            None => true,
        };
        let should_alert = self.counter >= self.config.counter_threshold && cooldown_elapsed;

        // The direct high-confidence path is NOT gated by the cooldown;
        // only the counter path is. Kept as observed in the field.
        if should_alert || is_alert_confidence {
            if self.state != DetectionState::Alert {
                tracing::info!(
                    smoothed = smoothed,
                    counter = self.counter,
                    via_counter = should_alert,
                    "Escalating to ALERT"
                );
            }
            self.state = DetectionState::Alert;
            self.last_alert_at = Some(now);
            // Partial reset: blocks an immediate re-trigger without
            // clearing all escalation memory.
            self.counter = self.config.counter_threshold / 2.0;
        } else if is_warning {
            self.state = DetectionState::Warning;
        } else {
            self.state = DetectionState::Monitoring;
        }

        DetectionOutput {
            state: self.state,
            smoothed,
            incident_signal: self.state == DetectionState::Alert,
        }
    }

    pub fn state(&self) -> DetectionState {
        self.state
    }

    pub fn counter(&self) -> f32 {
        self.counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> DetectionStateMachine {
        DetectionStateMachine::with_defaults()
    }

    #[test]
    fn smoothed_stays_within_recent_sample_bounds() {
        let mut smoother = ConfidenceSmoother::new(10);
        let samples = [0.1, 0.9, 0.3, 0.7, 0.2, 0.95, 0.0, 0.5, 0.6, 0.4, 0.8, 0.15];
        let mut window: Vec<f32> = Vec::new();

        for &s in &samples {
            window.push(s);
            if window.len() > 10 {
                window.remove(0);
            }
            let smoothed = smoother.push(s);
            let min = window.iter().cloned().fold(f32::INFINITY, f32::min);
            let max = window.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
            assert!(smoothed >= min - 1e-6 && smoothed <= max + 1e-6);
        }
    }

    #[test]
    fn first_sample_is_its_own_mean() {
        let mut smoother = ConfidenceSmoother::new(10);
        assert!(smoother.is_empty());
        assert!((smoother.push(0.42) - 0.42).abs() < 1e-6);
    }

    #[test]
    fn counter_never_goes_negative() {
        let mut m = machine();
        let t0 = Instant::now();
        for i in 0..50 {
            m.observe_at(0.0, t0 + Duration::from_millis(i * 100));
            assert!(m.counter() >= 0.0);
        }
    }

    #[test]
    fn sustained_moderate_scores_alert_exactly_once_within_cooldown() {
        let mut m = machine();
        let t0 = Instant::now();
        let mut alerts = 0;

        // 0.6 keeps the smoothed mean above 0.5 but below the direct
        // 0.85 path, so only the counter path can fire. 240 frames at
        // 100ms span 24s, well inside the 60s cooldown.
        for i in 0..240u64 {
            let out = m.observe_at(0.6, t0 + Duration::from_millis(i * 100));
            if out.state == DetectionState::Alert {
                alerts += 1;
            }
        }

        assert_eq!(alerts, 1);
    }

    #[test]
    fn counter_equals_half_threshold_after_alert() {
        let mut m = machine();
        let t0 = Instant::now();

        for i in 0..40u64 {
            let out = m.observe_at(0.6, t0 + Duration::from_millis(i * 100));
            if out.state == DetectionState::Alert {
                assert!((m.counter() - 20.0).abs() < f32::EPSILON);
                return;
            }
        }
        panic!("counter path never reached ALERT");
    }

    #[test]
    fn counter_path_respects_cooldown_then_realerts() {
        let mut m = machine();
        let t0 = Instant::now();
        let mut alert_frames = Vec::new();

        // One frame per second for 150s; alert at ~40s, counter back at
        // threshold ~60s later but gated until cooldown passes.
        for i in 0..150u64 {
            let out = m.observe_at(0.6, t0 + Duration::from_secs(i));
            if out.state == DetectionState::Alert {
                alert_frames.push(i);
            }
        }

        assert_eq!(alert_frames.len(), 2);
        assert!(alert_frames[1] - alert_frames[0] > 60);
    }

    #[test]
    fn direct_high_confidence_path_bypasses_cooldown() {
        let mut m = machine();
        let t0 = Instant::now();
        let mut alerts = 0;

        // Smoothed crosses 0.85 and stays there; the direct path
        // re-enters ALERT every frame with no cooldown gating. This
        // asymmetry is deliberate; do not "fix" it here.
        for i in 0..30u64 {
            let out = m.observe_at(0.95, t0 + Duration::from_millis(i * 100));
            if out.state == DetectionState::Alert {
                alerts += 1;
            }
        }

        assert!(alerts > 1);
    }

    #[test]
    fn warning_band_reports_warning_without_incident_signal() {
        let mut m = machine();
        let t0 = Instant::now();
        let mut out = m.observe_at(0.75, t0);
        for i in 1..5u64 {
            out = m.observe_at(0.75, t0 + Duration::from_millis(i * 100));
        }
        assert_eq!(out.state, DetectionState::Warning);
        assert!(!out.incident_signal);
    }

    #[test]
    fn raw_scores_are_clamped() {
        let mut m = machine();
        let out = m.observe_at(7.5, Instant::now());
        assert!(out.smoothed <= 1.0);
    }
}
