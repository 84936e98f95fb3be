//! Contextual variant selection via Thompson Sampling.
//!
//! Each arm keeps an independent Beta posterior per context feature. A
//! selection draws one sample from every posterior, scores each arm by the
//! dot product of its draws with the context vector, and picks the argmax.
//! Updates move probability mass in proportion to how strongly each feature
//! was active when the reward arrived.

use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Beta, Distribution};
use serde::{Deserialize, Serialize};

use crate::checkpoint::CheckpointError;

/// Errors surfaced by bandit operations.
#[derive(Debug, PartialEq, Eq)]
pub enum BanditError {
    /// The supplied context vector does not match the configured feature count.
    ContextDimensionMismatch { expected: usize, found: usize },
    /// The supplied arm index is outside the configured arm set.
    ArmOutOfRange { arm: usize, arms: usize },
}

impl fmt::Display for BanditError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BanditError::ContextDimensionMismatch { expected, found } => write!(
                f,
                "Context dimension mismatch: expected {expected} features, found {found}",
            ),
            BanditError::ArmOutOfRange { arm, arms } => {
                write!(f, "Arm index {arm} is out of range for {arms} arms")
            }
        }
    }
}

impl std::error::Error for BanditError {}

/// Outcome of one selection round.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ArmSelection {
    /// Chosen arm index, always below the configured arm count.
    pub arm: usize,
    /// Sampled score of the chosen arm. Zero when the draw fell back.
    pub sampled_score: f32,
    /// True when posterior sampling failed and the arm was drawn uniformly.
    pub fallback: bool,
}

/// Monitoring view of one arm's posterior and reward totals.
#[derive(Debug, Clone, Serialize)]
pub struct ArmStatistics {
    pub arm: usize,
    pub pulls: u64,
    pub total_reward: f32,
    pub mean_reward: f32,
    /// Heuristic monitoring signal that grows with the global pull count and
    /// shrinks for frequently pulled arms. Not a statistical confidence bound.
    pub exploration_pressure: f32,
}

/// Aggregate statistics across the whole arm set.
#[derive(Debug, Clone, Serialize)]
pub struct BanditStatistics {
    pub total_pulls: u64,
    pub fallback_draws: u64,
    pub arms: Vec<ArmStatistics>,
}

/// Serialized bandit state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanditSnapshot {
    pub seed: u64,
    pub alpha: Vec<Vec<f32>>,
    pub beta: Vec<Vec<f32>>,
    pub total_reward: Vec<f32>,
    pub total_pulls: Vec<u64>,
    pub fallback_draws: u64,
}

/// Thompson Sampling bandit with per-arm, per-feature Beta posteriors.
///
/// All posteriors start at Beta(1, 1). Updates are purely additive, so every
/// `alpha` and `beta` entry stays positive as long as context values are
/// non-negative. A selection that produces a non-finite score recovers by
/// drawing an arm uniformly at random instead of failing.
pub struct ContextualBandit {
    n_arms: usize,
    n_features: usize,
    seed: u64,
    alpha: Vec<Vec<f32>>,
    beta: Vec<Vec<f32>>,
    total_reward: Vec<f32>,
    total_pulls: Vec<u64>,
    fallback_draws: u64,
    rng: StdRng,
}

impl ContextualBandit {
    /// Create a bandit with uniform priors over `n_arms` arms and
    /// `n_features` context features.
    pub fn new(n_arms: usize, n_features: usize, seed: u64) -> Self {
        let n_arms = n_arms.max(1);
        let n_features = n_features.max(1);
        Self {
            n_arms,
            n_features,
            seed,
            alpha: vec![vec![1.0; n_features]; n_arms],
            beta: vec![vec![1.0; n_features]; n_arms],
            total_reward: vec![0.0; n_arms],
            total_pulls: vec![0; n_arms],
            fallback_draws: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn n_arms(&self) -> usize {
        self.n_arms
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    fn check_context(&self, context: &[f32]) -> Result<(), BanditError> {
        if context.len() != self.n_features {
            return Err(BanditError::ContextDimensionMismatch {
                expected: self.n_features,
                found: context.len(),
            });
        }
        Ok(())
    }

    /// Sample one arm for the given context.
    ///
    /// Ties keep the lowest arm index. When any posterior draw or score is
    /// non-finite the round falls back to a uniform draw and the selection
    /// is flagged, leaving the posteriors untouched.
    pub fn select_arm(&mut self, context: &[f32]) -> Result<ArmSelection, BanditError> {
        self.check_context(context)?;

        let mut scores = Vec::with_capacity(self.n_arms);
        let mut stable = true;

        'arms: for arm in 0..self.n_arms {
            let mut score = 0.0f32;
            for (feature, &value) in context.iter().enumerate() {
                let draw = match Beta::new(self.alpha[arm][feature], self.beta[arm][feature]) {
                    Ok(dist) => dist.sample(&mut self.rng),
                    Err(_) => {
                        stable = false;
                        break 'arms;
                    }
                };
                score += draw * value;
            }
            if !score.is_finite() {
                stable = false;
                break;
            }
            scores.push(score);
        }

        if !stable {
            self.fallback_draws += 1;
            let arm = self.rng.gen_range(0..self.n_arms);
            return Ok(ArmSelection {
                arm,
                sampled_score: 0.0,
                fallback: true,
            });
        }

        let mut best_arm = 0usize;
        let mut best_score = scores[0];
        for (arm, &score) in scores.iter().enumerate().skip(1) {
            if score > best_score {
                best_arm = arm;
                best_score = score;
            }
        }

        Ok(ArmSelection {
            arm: best_arm,
            sampled_score: best_score,
            fallback: false,
        })
    }

    /// Fold one observed reward into the chosen arm's posteriors.
    ///
    /// The reward is clipped to `[0, 1]` and a non-finite reward counts as
    /// zero. Each feature's posterior moves in proportion to the feature's
    /// activation: `alpha += context * reward` and
    /// `beta += context * (1 - reward)`.
    pub fn update(&mut self, arm: usize, context: &[f32], reward: f32) -> Result<(), BanditError> {
        self.check_context(context)?;
        if arm >= self.n_arms {
            return Err(BanditError::ArmOutOfRange {
                arm,
                arms: self.n_arms,
            });
        }

        let reward = if reward.is_finite() {
            reward.clamp(0.0, 1.0)
        } else {
            0.0
        };

        for (feature, &value) in context.iter().enumerate() {
            if !value.is_finite() {
                continue;
            }
            self.alpha[arm][feature] += value * reward;
            self.beta[arm][feature] += value * (1.0 - reward);
        }

        self.total_pulls[arm] += 1;
        self.total_reward[arm] += reward;
        Ok(())
    }

    /// Monitoring statistics for every arm.
    pub fn statistics(&self) -> BanditStatistics {
        let total_pulls: u64 = self.total_pulls.iter().sum();
        let pressure_base = if total_pulls > 0 {
            let n = total_pulls as f32;
            (n * n.ln()).max(0.0).sqrt()
        } else {
            0.0
        };

        let arms = (0..self.n_arms)
            .map(|arm| {
                let pulls = self.total_pulls[arm];
                ArmStatistics {
                    arm,
                    pulls,
                    total_reward: self.total_reward[arm],
                    mean_reward: self.total_reward[arm] / (pulls as f32 + 1e-6),
                    exploration_pressure: pressure_base / (pulls as f32 + 1.0),
                }
            })
            .collect();

        BanditStatistics {
            total_pulls,
            fallback_draws: self.fallback_draws,
            arms,
        }
    }

    /// Capture the full posterior state.
    pub fn snapshot(&self) -> BanditSnapshot {
        BanditSnapshot {
            seed: self.seed,
            alpha: self.alpha.clone(),
            beta: self.beta.clone(),
            total_reward: self.total_reward.clone(),
            total_pulls: self.total_pulls.clone(),
            fallback_draws: self.fallback_draws,
        }
    }

    /// Rebuild a bandit from a snapshot, validating every dimension against
    /// the expected shape before any state is adopted.
    pub fn from_snapshot(
        snapshot: &BanditSnapshot,
        n_arms: usize,
        n_features: usize,
    ) -> Result<Self, CheckpointError> {
        if snapshot.alpha.len() != n_arms || snapshot.beta.len() != n_arms {
            return Err(CheckpointError::InvalidFormat(format!(
                "expected {} arms, snapshot holds {} alpha rows and {} beta rows",
                n_arms,
                snapshot.alpha.len(),
                snapshot.beta.len(),
            )));
        }
        if snapshot.total_reward.len() != n_arms || snapshot.total_pulls.len() != n_arms {
            return Err(CheckpointError::InvalidFormat(
                "reward and pull counters must cover every arm".to_string(),
            ));
        }
        for (arm, (alpha_row, beta_row)) in
            snapshot.alpha.iter().zip(snapshot.beta.iter()).enumerate()
        {
            if alpha_row.len() != n_features || beta_row.len() != n_features {
                return Err(CheckpointError::InvalidFormat(format!(
                    "arm {} posterior rows must hold {} features",
                    arm, n_features,
                )));
            }
        }

        Ok(Self {
            n_arms,
            n_features,
            seed: snapshot.seed,
            alpha: snapshot.alpha.clone(),
            beta: snapshot.beta.clone(),
            total_reward: snapshot.total_reward.clone(),
            total_pulls: snapshot.total_pulls.clone(),
            fallback_draws: snapshot.fallback_draws,
            rng: StdRng::seed_from_u64(snapshot.seed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_stays_in_range() {
        let mut bandit = ContextualBandit::new(4, 3, 11);
        let context = [0.4, 0.9, 0.2];
        for _ in 0..200 {
            let selection = bandit.select_arm(&context).unwrap();
            assert!(selection.arm < 4);
            assert!(!selection.fallback);
        }
    }

    #[test]
    fn zero_context_ties_resolve_to_lowest_arm() {
        let mut bandit = ContextualBandit::new(5, 3, 3);
        let selection = bandit.select_arm(&[0.0, 0.0, 0.0]).unwrap();
        assert_eq!(selection.arm, 0);
        assert!((selection.sampled_score - 0.0).abs() < 1e-6);
    }

    #[test]
    fn update_is_purely_additive() {
        let mut bandit = ContextualBandit::new(2, 2, 1);
        bandit.update(0, &[0.5, 0.25], 0.8).unwrap();

        assert!((bandit.alpha[0][0] - 1.4).abs() < 1e-6);
        assert!((bandit.alpha[0][1] - 1.2).abs() < 1e-6);
        assert!((bandit.beta[0][0] - 1.1).abs() < 1e-6);
        assert!((bandit.beta[0][1] - 1.05).abs() < 1e-6);

        // The untouched arm keeps its uniform prior.
        assert!((bandit.alpha[1][0] - 1.0).abs() < 1e-6);
        assert!((bandit.beta[1][0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn rewards_are_clipped_to_unit_interval() {
        let mut bandit = ContextualBandit::new(1, 1, 1);
        bandit.update(0, &[1.0], 1.7).unwrap();
        assert!((bandit.alpha[0][0] - 2.0).abs() < 1e-6);
        assert!((bandit.beta[0][0] - 1.0).abs() < 1e-6);

        bandit.update(0, &[1.0], -0.5).unwrap();
        assert!((bandit.alpha[0][0] - 2.0).abs() < 1e-6);
        assert!((bandit.beta[0][0] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn non_finite_reward_counts_as_zero() {
        let mut bandit = ContextualBandit::new(1, 1, 1);
        bandit.update(0, &[1.0], f32::NAN).unwrap();
        assert!((bandit.alpha[0][0] - 1.0).abs() < 1e-6);
        assert!((bandit.beta[0][0] - 2.0).abs() < 1e-6);
        assert_eq!(bandit.total_pulls[0], 1);
    }

    #[test]
    fn dimension_mismatch_leaves_state_untouched() {
        let mut bandit = ContextualBandit::new(2, 3, 9);
        let err = bandit.select_arm(&[0.1, 0.2]).unwrap_err();
        assert_eq!(
            err,
            BanditError::ContextDimensionMismatch {
                expected: 3,
                found: 2
            }
        );

        let err = bandit.update(0, &[0.1, 0.2, 0.3, 0.4], 0.5).unwrap_err();
        assert!(matches!(err, BanditError::ContextDimensionMismatch { .. }));
        assert_eq!(bandit.statistics().total_pulls, 0);
    }

    #[test]
    fn arm_out_of_range_is_rejected() {
        let mut bandit = ContextualBandit::new(2, 1, 5);
        let err = bandit.update(2, &[1.0], 0.5).unwrap_err();
        assert_eq!(err, BanditError::ArmOutOfRange { arm: 2, arms: 2 });
    }

    #[test]
    fn bandit_converges_to_rewarding_arm() {
        let mut bandit = ContextualBandit::new(2, 3, 7);
        let context = [1.0, 1.0, 1.0];

        for _ in 0..50 {
            bandit.update(0, &context, 1.0).unwrap();
            bandit.update(1, &context, 0.0).unwrap();
        }

        let mut first_arm = 0usize;
        for _ in 0..1000 {
            let selection = bandit.select_arm(&context).unwrap();
            if selection.arm == 0 {
                first_arm += 1;
            }
        }

        assert!(
            first_arm > 950,
            "rewarding arm chosen only {first_arm}/1000 times"
        );
    }

    #[test]
    fn poisoned_posterior_falls_back_to_uniform_draw() {
        let mut bandit = ContextualBandit::new(2, 1, 13);
        // A strongly negative context drives alpha below zero, which makes
        // the Beta distribution unconstructible.
        for _ in 0..10 {
            bandit.update(0, &[-5.0], 1.0).unwrap();
        }
        assert!(bandit.alpha[0][0] <= 0.0);

        let selection = bandit.select_arm(&[1.0]).unwrap();
        assert!(selection.fallback);
        assert!(selection.arm < 2);
        assert_eq!(bandit.statistics().fallback_draws, 1);
    }

    #[test]
    fn statistics_report_exploration_pressure() {
        let mut bandit = ContextualBandit::new(2, 1, 21);
        for _ in 0..9 {
            bandit.update(0, &[1.0], 1.0).unwrap();
        }
        bandit.update(1, &[1.0], 0.0).unwrap();

        let stats = bandit.statistics();
        assert_eq!(stats.total_pulls, 10);
        let expected_base = (10.0f32 * 10.0f32.ln()).sqrt();
        assert!((stats.arms[0].exploration_pressure - expected_base / 10.0).abs() < 1e-5);
        assert!((stats.arms[1].exploration_pressure - expected_base / 2.0).abs() < 1e-5);
        // The rarely pulled arm carries more pressure.
        assert!(stats.arms[1].exploration_pressure > stats.arms[0].exploration_pressure);
        assert!((stats.arms[0].mean_reward - 1.0).abs() < 1e-3);
    }

    #[test]
    fn snapshot_roundtrip_preserves_posteriors() {
        let mut bandit = ContextualBandit::new(3, 2, 17);
        let context = [0.8, 0.3];
        for step in 0..30 {
            let selection = bandit.select_arm(&context).unwrap();
            bandit
                .update(selection.arm, &context, (step % 3) as f32 / 2.0)
                .unwrap();
        }

        let snapshot = bandit.snapshot();
        let restored = ContextualBandit::from_snapshot(&snapshot, 3, 2).unwrap();

        assert_eq!(restored.alpha, bandit.alpha);
        assert_eq!(restored.beta, bandit.beta);
        assert_eq!(restored.total_pulls, bandit.total_pulls);
        assert_eq!(restored.fallback_draws, bandit.fallback_draws);
    }

    #[test]
    fn snapshot_with_wrong_shape_is_rejected() {
        let bandit = ContextualBandit::new(3, 2, 17);
        let mut snapshot = bandit.snapshot();
        snapshot.alpha[1] = vec![1.0];

        let result = ContextualBandit::from_snapshot(&snapshot, 3, 2);
        assert!(matches!(result, Err(CheckpointError::InvalidFormat(_))));

        let result = ContextualBandit::from_snapshot(&bandit.snapshot(), 4, 2);
        assert!(matches!(result, Err(CheckpointError::InvalidFormat(_))));
    }
}
