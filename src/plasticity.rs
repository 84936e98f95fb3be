//! Plasticity scoring and growth estimation for session outcomes.
//!
//! The scorer blends band power and outcome measurements into one bounded
//! score per event, keeps parallel bounded histories of the raw blends and
//! the final scores, and fits a regression slope over the recent window to
//! estimate growth potential.

use serde::{Deserialize, Serialize};

use crate::checkpoint::CheckpointError;
use crate::config::PlasticityConfig;

/// Weight of the theta band power in the blended score.
const THETA_WEIGHT: f32 = 0.30;
/// Weight of the alpha band power.
const ALPHA_WEIGHT: f32 = 0.25;
/// Weight of the measured retention.
const RETENTION_WEIGHT: f32 = 0.20;
/// Weight of the measured improvement.
const IMPROVEMENT_WEIGHT: f32 = 0.15;
/// Weight of the gamma band power.
const GAMMA_WEIGHT: f32 = 0.10;

/// Scores needed before trend fitting replaces the cold-start estimate.
const MIN_TREND_POINTS: usize = 5;
/// Recent scores the trend slope and the momentum term look at.
const TREND_WINDOW: usize = 10;
/// History length at which growth confidence saturates at 1.0.
const CONFIDENCE_SATURATION: f32 = 20.0;
/// Strength of the recent-score momentum applied to each new score.
const MOMENTUM_GAIN: f32 = 0.1;

/// Band power measurements attached to one session event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FeatureBands {
    pub theta_power: f32,
    pub alpha_power: f32,
    pub gamma_power: f32,
}

/// Observed outcome of one session event, each value in `[0, 1]`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SessionOutcome {
    /// Fraction of presented material retained.
    pub retention: f32,
    /// Improvement over the previous comparable session.
    pub improvement: f32,
    /// Measured adaptation level the controller steers.
    pub adaptation: f32,
}

/// Growth estimate derived from the recent score history.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct GrowthEstimate {
    /// Projected score gain over the next trend window, floored at zero.
    pub growth_potential: f32,
    /// Confidence in the projection, rising with history length up to 1.0.
    pub confidence: f32,
}

/// Serialized scorer state: both parallel bounded histories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlasticitySnapshot {
    pub experience_history: Vec<f32>,
    pub plasticity_scores: Vec<f32>,
}

/// Stateful scorer that turns band powers and outcomes into bounded scores.
///
/// Each event appends the raw weighted blend to the experience history and
/// the final momentum-adjusted score to the parallel score list; both evict
/// FIFO at the configured capacity. Scoring is history dependent: a run of
/// strong recent scores nudges the next score upward through the momentum
/// term, so two scorers only agree when their histories agree.
pub struct PlasticityScorer {
    history_capacity: usize,
    experience_history: Vec<f32>,
    plasticity_scores: Vec<f32>,
}

impl PlasticityScorer {
    pub fn new(config: &PlasticityConfig) -> Self {
        Self {
            history_capacity: config.history_capacity.max(MIN_TREND_POINTS),
            experience_history: Vec::new(),
            plasticity_scores: Vec::new(),
        }
    }

    /// Number of scores currently retained.
    pub fn history_len(&self) -> usize {
        self.plasticity_scores.len()
    }

    /// Blend one event into a bounded plasticity score and record it.
    ///
    /// The weighted base blend is scaled by `1 + mean(recent) * 0.1`, where
    /// `recent` covers at most the last ten scores, then clipped to `[0, 1]`.
    /// The unclipped blend lands in the experience history, the clipped
    /// score in the score list.
    pub fn score(&mut self, bands: &FeatureBands, outcome: &SessionOutcome) -> f32 {
        let mut base = THETA_WEIGHT * bands.theta_power
            + ALPHA_WEIGHT * bands.alpha_power
            + RETENTION_WEIGHT * outcome.retention
            + IMPROVEMENT_WEIGHT * outcome.improvement
            + GAMMA_WEIGHT * bands.gamma_power;
        if !base.is_finite() {
            base = 0.0;
        }

        let momentum = 1.0 + self.recent_mean() * MOMENTUM_GAIN;
        let score = (base * momentum).clamp(0.0, 1.0);

        self.experience_history.push(base);
        self.plasticity_scores.push(score);
        if self.plasticity_scores.len() > self.history_capacity {
            self.experience_history.remove(0);
            self.plasticity_scores.remove(0);
        }

        score
    }

    /// Estimate near-term growth from the recent score trend.
    ///
    /// With fewer than five recorded scores the estimate stays at the
    /// cold-start value of 0.1 with confidence 0.5. Otherwise the slope of
    /// the last ten scores is projected one window ahead and floored at
    /// zero, and confidence rises linearly until twenty scores are on file.
    pub fn growth_potential(&self) -> GrowthEstimate {
        let len = self.plasticity_scores.len();
        if len < MIN_TREND_POINTS {
            return GrowthEstimate {
                growth_potential: 0.1,
                confidence: 0.5,
            };
        }

        let start = len.saturating_sub(TREND_WINDOW);
        let slope = linear_slope(&self.plasticity_scores[start..]);
        GrowthEstimate {
            growth_potential: (slope * TREND_WINDOW as f32).max(0.0),
            confidence: (len as f32 / CONFIDENCE_SATURATION).min(1.0),
        }
    }

    fn recent_mean(&self) -> f32 {
        let len = self.plasticity_scores.len();
        if len == 0 {
            return 0.0;
        }
        let start = len.saturating_sub(TREND_WINDOW);
        let recent = &self.plasticity_scores[start..];
        recent.iter().copied().sum::<f32>() / recent.len() as f32
    }

    /// Capture both retained histories.
    pub fn snapshot(&self) -> PlasticitySnapshot {
        PlasticitySnapshot {
            experience_history: self.experience_history.clone(),
            plasticity_scores: self.plasticity_scores.clone(),
        }
    }

    /// Rebuild a scorer from a snapshot, keeping at most the newest
    /// `history_capacity` entries of each list. The lists must run in
    /// parallel or the snapshot is rejected.
    pub fn from_snapshot(
        snapshot: &PlasticitySnapshot,
        config: &PlasticityConfig,
    ) -> Result<Self, CheckpointError> {
        if snapshot.experience_history.len() != snapshot.plasticity_scores.len() {
            return Err(CheckpointError::InvalidFormat(format!(
                "experience history holds {} entries against {} scores",
                snapshot.experience_history.len(),
                snapshot.plasticity_scores.len(),
            )));
        }

        let mut scorer = Self::new(config);
        let keep = snapshot
            .plasticity_scores
            .len()
            .saturating_sub(scorer.history_capacity);
        scorer.experience_history = snapshot.experience_history[keep..].to_vec();
        scorer.plasticity_scores = snapshot.plasticity_scores[keep..].to_vec();
        Ok(scorer)
    }
}

fn linear_slope(series: &[f32]) -> f32 {
    let len = series.len();
    if len < 2 {
        return 0.0;
    }

    let mut sum_x = 0.0f32;
    let mut sum_y = 0.0f32;
    let mut sum_xy = 0.0f32;
    let mut sum_x2 = 0.0f32;

    for (idx, &value) in series.iter().enumerate() {
        let x = idx as f32;
        sum_x += x;
        sum_y += value;
        sum_xy += x * value;
        sum_x2 += x * x;
    }

    let n = len as f32;
    let denominator = n * sum_x2 - sum_x * sum_x;
    if denominator.abs() < f32::EPSILON {
        return 0.0;
    }

    (n * sum_xy - sum_x * sum_y) / denominator
}
