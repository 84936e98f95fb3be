//! Fuzzy-scheduled PID control over the adaptation signal.
//!
//! The controller drives a measured signal toward a setpoint with a PID law
//! whose gains are rescaled every step by fuzzy membership of the current
//! error magnitude and error rate:
//!
//! ```text
//! signal = kp' * error + ki' * integral + kd' * error_rate
//! kp'    = kp * blend(rule activations)
//! ```
//!
//! Membership is triangular over the low, medium and high ranges, and only
//! the diagonal rules fire. When no rule fires, or an intermediate value is
//! non-finite, the step falls back to the base gains with a reported
//! confidence of 0.5. The integral accumulator is clamped symmetrically so
//! a persistent error cannot wind it up without bound.

use rustfft::num_complex::Complex32;
use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};

use crate::checkpoint::CheckpointError;
use crate::config::ControllerConfig;

/// Low membership is a triangle peaking at zero with this width.
const LOW_WIDTH: f32 = 0.5;
/// Medium membership peaks here.
const MEDIUM_PEAK: f32 = 0.5;
/// Medium membership triangle width.
const MEDIUM_WIDTH: f32 = 0.3;
/// High membership ramps from this value up to 1.0.
const HIGH_RAMP_START: f32 = 0.3;

/// Proportional gain scale per fired rule (low, medium, high).
const KP_SCALES: [f32; 3] = [0.8, 1.0, 1.2];
/// Integral gain scales, closer to unity than the proportional scales.
const KI_SCALES: [f32; 3] = [0.9, 1.0, 1.1];
/// Derivative gain scales, the narrowest spread of the three.
const KD_SCALES: [f32; 3] = [0.95, 1.0, 1.05];

/// Spectral prominence a cycle must reach before it is reported.
const OSCILLATION_PROMINENCE: f32 = 0.15;

/// Gains actually applied on the most recent step.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct GainSchedule {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    /// Total rule activation, clipped to 1.0. Fixed at 0.5 on fallback.
    pub fuzzy_confidence: f32,
    /// True when the step used the base gains instead of a fuzzy blend.
    pub fallback: bool,
}

impl GainSchedule {
    fn base(config: &ControllerConfig) -> Self {
        Self {
            kp: config.kp,
            ki: config.ki,
            kd: config.kd,
            fuzzy_confidence: 0.5,
            fallback: true,
        }
    }
}

/// Serialized controller state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerSnapshot {
    pub previous_error: f32,
    pub integral_error: f32,
    pub error_history: Vec<f32>,
}

/// PID controller with fuzzy gain scheduling and anti-windup clamping.
pub struct FuzzyPidController {
    config: ControllerConfig,
    previous_error: f32,
    integral_error: f32,
    error_history: Vec<f32>,
    last_schedule: GainSchedule,
}

impl FuzzyPidController {
    pub fn new(config: ControllerConfig) -> Self {
        let last_schedule = GainSchedule::base(&config);
        Self {
            config,
            previous_error: 0.0,
            integral_error: 0.0,
            error_history: Vec::new(),
            last_schedule,
        }
    }

    /// Compute one control step toward `setpoint`.
    ///
    /// The step is fully deterministic in the controller state and inputs.
    /// Non-finite inputs mutate nothing and return a zero signal.
    pub fn control_signal(&mut self, setpoint: f32, measured: f32) -> f32 {
        let error = setpoint - measured;
        if !error.is_finite() {
            self.last_schedule = GainSchedule::base(&self.config);
            return 0.0;
        }

        let error_rate = error - self.previous_error;
        let schedule = self.schedule_gains(error.abs(), error_rate.abs());

        self.integral_error = (self.integral_error + error)
            .clamp(-self.config.integral_clamp, self.config.integral_clamp);

        let signal =
            schedule.kp * error + schedule.ki * self.integral_error + schedule.kd * error_rate;

        self.previous_error = error;
        self.error_history.push(error);
        if self.error_history.len() > self.config.history_capacity {
            self.error_history.remove(0);
        }
        self.last_schedule = schedule;

        signal
    }

    /// Gains applied on the most recent step.
    pub fn last_schedule(&self) -> GainSchedule {
        self.last_schedule
    }

    /// Dominant cycle length of the recent error history, in steps.
    ///
    /// Returns 0.0 when the history is too short or no frequency stands out
    /// from the rest of the spectrum.
    pub fn oscillation_period(&self) -> f32 {
        dominant_cycle_length(&self.error_history, OSCILLATION_PROMINENCE)
    }

    /// Clear accumulators and history, keeping the configured gains.
    pub fn reset(&mut self) {
        self.previous_error = 0.0;
        self.integral_error = 0.0;
        self.error_history.clear();
        self.last_schedule = GainSchedule::base(&self.config);
    }

    fn schedule_gains(&self, error_mag: f32, rate_mag: f32) -> GainSchedule {
        let low = membership_low(error_mag) * membership_low(rate_mag);
        let medium = membership_medium(error_mag) * membership_medium(rate_mag);
        let high = membership_high(error_mag) * membership_high(rate_mag);
        let total = low + medium + high;

        if !total.is_finite() || total <= f32::EPSILON {
            return GainSchedule::base(&self.config);
        }

        let blend = |scales: [f32; 3]| {
            (scales[0] * low + scales[1] * medium + scales[2] * high) / total
        };

        GainSchedule {
            kp: self.config.kp * blend(KP_SCALES),
            ki: self.config.ki * blend(KI_SCALES),
            kd: self.config.kd * blend(KD_SCALES),
            fuzzy_confidence: total.min(1.0),
            fallback: false,
        }
    }

    /// Capture accumulators and error history.
    pub fn snapshot(&self) -> ControllerSnapshot {
        ControllerSnapshot {
            previous_error: self.previous_error,
            integral_error: self.integral_error,
            error_history: self.error_history.clone(),
        }
    }

    /// Rebuild a controller from a snapshot. Non-finite accumulators or
    /// history entries are rejected so a corrupted file cannot poison
    /// future steps.
    pub fn from_snapshot(
        snapshot: &ControllerSnapshot,
        config: ControllerConfig,
    ) -> Result<Self, CheckpointError> {
        if !snapshot.previous_error.is_finite() || !snapshot.integral_error.is_finite() {
            return Err(CheckpointError::InvalidFormat(
                "controller accumulators must be finite".to_string(),
            ));
        }
        if snapshot.error_history.iter().any(|entry| !entry.is_finite()) {
            return Err(CheckpointError::InvalidFormat(
                "controller error history entries must be finite".to_string(),
            ));
        }

        let mut controller = Self::new(config);
        controller.previous_error = snapshot.previous_error;
        controller.integral_error = snapshot
            .integral_error
            .clamp(-controller.config.integral_clamp, controller.config.integral_clamp);
        let keep = snapshot
            .error_history
            .len()
            .saturating_sub(controller.config.history_capacity);
        controller.error_history = snapshot.error_history[keep..].to_vec();
        Ok(controller)
    }
}

fn membership_low(x: f32) -> f32 {
    (1.0 - x / LOW_WIDTH).max(0.0)
}

fn membership_medium(x: f32) -> f32 {
    (1.0 - (x - MEDIUM_PEAK).abs() / MEDIUM_WIDTH).max(0.0)
}

fn membership_high(x: f32) -> f32 {
    ((x - HIGH_RAMP_START) / (1.0 - HIGH_RAMP_START)).clamp(0.0, 1.0)
}

fn dominant_cycle_length(series: &[f32], prominence_limit: f32) -> f32 {
    let len = series.len();
    if len < 4 {
        return 0.0;
    }

    let mean = series.iter().copied().sum::<f32>() / len as f32;
    let mut buffer: Vec<Complex32> = series
        .iter()
        .map(|&value| Complex32::new(value - mean, 0.0))
        .collect();

    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(len);
    fft.process(&mut buffer);

    let mut total = 0.0f32;
    let mut strongest = 0.0f32;
    let mut strongest_index = 0usize;

    let upper = len / 2;
    for idx in 1..=upper {
        let magnitude = buffer[idx].norm();
        total += magnitude;
        if magnitude > strongest {
            strongest = magnitude;
            strongest_index = idx;
        }
    }

    if strongest_index == 0 || total <= f32::EPSILON {
        return 0.0;
    }

    let prominence = strongest / total;
    if prominence < prominence_limit {
        return 0.0;
    }

    (len as f32) / (strongest_index as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> FuzzyPidController {
        FuzzyPidController::new(ControllerConfig::default())
    }

    #[test]
    fn memberships_cover_expected_ranges() {
        assert!((membership_low(0.0) - 1.0).abs() < 1e-6);
        assert!((membership_low(0.25) - 0.5).abs() < 1e-6);
        assert!((membership_low(0.5) - 0.0).abs() < 1e-6);

        assert!((membership_medium(0.5) - 1.0).abs() < 1e-6);
        assert!((membership_medium(0.35) - 0.5).abs() < 1e-6);
        assert!((membership_medium(0.2) - 0.0).abs() < 1e-6);

        assert!((membership_high(0.3) - 0.0).abs() < 1e-6);
        assert!((membership_high(0.65) - 0.5).abs() < 1e-6);
        assert!((membership_high(1.0) - 1.0).abs() < 1e-6);
        assert!((membership_high(2.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn zero_error_produces_zero_signal() {
        let mut controller = controller();
        for _ in 0..20 {
            let signal = controller.control_signal(0.7, 0.7);
            assert!((signal - 0.0).abs() < 1e-6);
        }
        assert!((controller.integral_error - 0.0).abs() < 1e-6);
        assert!(!controller.last_schedule().fallback);
    }

    #[test]
    fn control_is_deterministic() {
        let mut a = controller();
        let mut b = controller();
        let inputs = [
            (0.8, 0.2),
            (0.8, 0.4),
            (0.8, 0.7),
            (0.8, 0.9),
            (0.8, 0.75),
        ];
        for (setpoint, measured) in inputs {
            assert_eq!(
                a.control_signal(setpoint, measured),
                b.control_signal(setpoint, measured)
            );
        }
    }

    #[test]
    fn positive_error_yields_positive_signal() {
        let mut controller = controller();
        let signal = controller.control_signal(0.9, 0.4);
        assert!(signal > 0.0);
    }

    #[test]
    fn small_error_uses_low_rule_gains() {
        let mut controller = controller();
        controller.control_signal(0.55, 0.5);
        let schedule = controller.last_schedule();
        assert!(!schedule.fallback);
        assert!((schedule.kp - 0.8).abs() < 1e-5);
        assert!((schedule.ki - 0.09).abs() < 1e-5);
        assert!((schedule.kd - 0.0475).abs() < 1e-5);
    }

    #[test]
    fn uncovered_rule_region_falls_back_to_base_gains() {
        let mut controller = controller();
        // Second step: error magnitude 1.0, error rate 0. No diagonal rule
        // covers that corner, so the base gains apply.
        controller.control_signal(1.0, 0.0);
        controller.control_signal(1.0, 0.0);
        let schedule = controller.last_schedule();
        assert!(schedule.fallback);
        assert!((schedule.kp - 1.0).abs() < 1e-6);
        assert!((schedule.fuzzy_confidence - 0.5).abs() < 1e-6);
    }

    #[test]
    fn integral_windup_is_clamped() {
        let mut controller = controller();
        let mut last_signal = 0.0;
        for _ in 0..100 {
            last_signal = controller.control_signal(1.0, 0.0);
        }
        assert!((controller.integral_error - 10.0).abs() < 1e-4);
        assert!(last_signal <= 2.5, "signal grew to {last_signal}");
    }

    #[test]
    fn non_finite_input_mutates_nothing() {
        let mut controller = controller();
        controller.control_signal(0.8, 0.3);
        let before = controller.snapshot();

        let signal = controller.control_signal(f32::NAN, 0.3);
        assert!((signal - 0.0).abs() < 1e-6);
        assert!(controller.last_schedule().fallback);
        assert!((controller.last_schedule().fuzzy_confidence - 0.5).abs() < 1e-6);

        let after = controller.snapshot();
        assert_eq!(before.previous_error, after.previous_error);
        assert_eq!(before.integral_error, after.integral_error);
        assert_eq!(before.error_history, after.error_history);
    }

    #[test]
    fn oscillating_error_reports_its_period() {
        let mut controller = controller();
        for step in 0..20 {
            let angle = (step as f32) * std::f32::consts::TAU / 5.0;
            controller.control_signal(0.5, 0.5 + 0.1 * angle.sin());
        }
        let period = controller.oscillation_period();
        assert!(period > 0.0);
        assert!((period - 5.0).abs() < 0.6);
    }

    #[test]
    fn steady_error_reports_no_oscillation() {
        let mut controller = controller();
        for _ in 0..20 {
            controller.control_signal(0.6, 0.5);
        }
        assert!((controller.oscillation_period() - 0.0).abs() < 1e-6);
    }

    #[test]
    fn reset_clears_accumulated_state() {
        let mut controller = controller();
        controller.control_signal(1.0, 0.0);
        controller.control_signal(1.0, 0.2);
        controller.reset();

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.previous_error, 0.0);
        assert_eq!(snapshot.integral_error, 0.0);
        assert!(snapshot.error_history.is_empty());
    }

    #[test]
    fn snapshot_roundtrip_preserves_behavior() {
        let mut original = controller();
        for step in 0..15 {
            original.control_signal(0.8, 0.1 + 0.05 * step as f32);
        }

        let snapshot = original.snapshot();
        let mut restored =
            FuzzyPidController::from_snapshot(&snapshot, ControllerConfig::default()).unwrap();

        assert_eq!(
            original.control_signal(0.8, 0.5),
            restored.control_signal(0.8, 0.5)
        );
    }

    #[test]
    fn snapshot_with_non_finite_accumulators_is_rejected() {
        let snapshot = ControllerSnapshot {
            previous_error: f32::NAN,
            integral_error: 0.0,
            error_history: vec![],
        };
        let result = FuzzyPidController::from_snapshot(&snapshot, ControllerConfig::default());
        assert!(matches!(result, Err(CheckpointError::InvalidFormat(_))));
    }

    #[test]
    fn snapshot_with_non_finite_history_is_rejected() {
        let mut controller = controller();
        controller.control_signal(0.8, 0.3);

        let mut snapshot = controller.snapshot();
        snapshot.error_history.push(f32::NAN);
        let result = FuzzyPidController::from_snapshot(&snapshot, ControllerConfig::default());
        assert!(matches!(result, Err(CheckpointError::InvalidFormat(_))));
    }
}
