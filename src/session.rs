//! Session event orchestration.
//!
//! One processor owns the full adaptive loop. Each incoming event is scored
//! for plasticity and routed through the bandit to pick a content variant;
//! the observed outcome then feeds the posteriors as reward while a control
//! signal steers the adaptation level toward its target. Accumulated
//! (context, retention) pairs feed the auxiliary classifier, which retrains
//! on a worker thread and is swapped in between events.

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bandit::{BanditError, BanditSnapshot, BanditStatistics, ContextualBandit};
use crate::checkpoint::{CheckpointError, Checkpointable};
use crate::config::{EngineConfig, RetrainMode};
use crate::control::{ControllerSnapshot, FuzzyPidController};
use crate::learner::{
    train_retention_model, BackgroundRetrainer, ClassifierConfig, RetentionClassifier,
    RetentionModel, RetrainMessage, RetrainReport, TrainingBuffer, TrainingExample, Weights,
};
use crate::logging;
use crate::plasticity::{FeatureBands, PlasticityScorer, PlasticitySnapshot, SessionOutcome};

/// Retention above this level labels an example as retained.
const RETENTION_LABEL_THRESHOLD: f32 = 0.75;

/// Schema version written into every exported snapshot.
pub const MODEL_SNAPSHOT_VERSION: u32 = 1;

/// Errors surfaced while processing a session event.
#[derive(Debug)]
pub enum SessionError {
    Bandit(BanditError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Bandit(err) => write!(f, "Bandit error: {err}"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<BanditError> for SessionError {
    fn from(err: BanditError) -> Self {
        SessionError::Bandit(err)
    }
}

/// One observed session event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    /// Stable learner trait features, length must match `trait_dims`.
    pub learner_traits: Vec<f32>,
    /// Band power measurements for this event.
    pub bands: FeatureBands,
    /// Measured outcome of the event.
    pub outcome: SessionOutcome,
    /// Engagement level the controller should steer adaptation toward.
    pub target_engagement: f32,
}

/// Structured result emitted for every processed event.
#[derive(Debug, Clone, Serialize)]
pub struct InsightRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub plasticity_score: f32,
    pub growth_potential: f32,
    pub growth_confidence: f32,
    pub selected_arm: usize,
    pub reward: f32,
    pub control_signal: f32,
    pub fuzzy_confidence: f32,
    /// Per-arm posterior statistics across the whole arm set at emission
    /// time, fallback draws included.
    pub bandit_stats: BanditStatistics,
    /// True when the arm came from a uniform fallback draw.
    pub explored_fallback: bool,
    /// True once any retrain has completed and been swapped in.
    pub trained: bool,
    pub training_buffer_len: usize,
    /// Retrain that completed during this event, inline or collected from
    /// the background worker.
    pub retrain: Option<RetrainReport>,
    /// Human-readable note when a recoverable numeric issue occurred.
    pub error: Option<String>,
}

/// Serialized aggregate of every stateful component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub schema_version: u32,
    pub created_at: DateTime<Utc>,
    pub config: EngineConfig,
    pub bandit: BanditSnapshot,
    pub plasticity: PlasticitySnapshot,
    pub controller: ControllerSnapshot,
    pub classifier: Weights,
    pub trained: bool,
    pub examples_seen: u64,
}

/// Owner of the adaptive loop. Create one per learner stream.
pub struct SessionProcessor {
    config: EngineConfig,
    bandit: ContextualBandit,
    plasticity: PlasticityScorer,
    controller: FuzzyPidController,
    classifier: RetentionClassifier,
    buffer: TrainingBuffer,
    retrainer: BackgroundRetrainer,
    trained: bool,
    events_processed: u64,
}

impl SessionProcessor {
    pub fn new(config: EngineConfig) -> Self {
        let bandit = ContextualBandit::new(config.n_arms, config.augmented_dims(), config.seed);
        let plasticity = PlasticityScorer::new(&config.plasticity);
        let controller = FuzzyPidController::new(config.controller.clone());
        let classifier = RetentionClassifier::new(classifier_config_for(&config));
        let buffer = TrainingBuffer::new(config.learner.buffer_capacity);

        Self {
            config,
            bandit,
            plasticity,
            controller,
            classifier,
            buffer,
            retrainer: BackgroundRetrainer::new(),
            trained: false,
            events_processed: 0,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    /// True once a completed retrain has been swapped in.
    pub fn is_trained(&self) -> bool {
        self.trained
    }

    pub fn bandit_statistics(&self) -> BanditStatistics {
        self.bandit.statistics()
    }

    /// Dominant cycle length of the recent control error, in events.
    pub fn control_oscillation_period(&self) -> f32 {
        self.controller.oscillation_period()
    }

    /// Run one event through the full loop.
    ///
    /// The only hard failure is a trait vector that does not match the
    /// configured dimensionality; it leaves all state untouched. Recoverable
    /// numeric issues are noted on the returned record instead.
    pub fn process(&mut self, event: &SessionEvent) -> Result<InsightRecord, SessionError> {
        if event.learner_traits.len() != self.config.trait_dims {
            return Err(BanditError::ContextDimensionMismatch {
                expected: self.config.trait_dims,
                found: event.learner_traits.len(),
            }
            .into());
        }

        let mut retrain = self.absorb_background_result();
        let mut recovered: Vec<String> = Vec::new();

        let plasticity_score = self.plasticity.score(&event.bands, &event.outcome);
        let growth = self.plasticity.growth_potential();
        let context = self.augmented_context(event, plasticity_score);

        let selection = self.bandit.select_arm(&context)?;
        if selection.fallback {
            recovered.push("bandit selection fell back to a uniform draw".to_string());
        }

        let reward = event.outcome.retention * event.outcome.improvement;
        self.bandit.update(selection.arm, &context, reward)?;

        let control_signal = self
            .controller
            .control_signal(event.target_engagement, event.outcome.adaptation);
        let schedule = self.controller.last_schedule();
        if schedule.fallback {
            recovered.push("controller gains fell back to base values".to_string());
        }

        if self.config.learner.enabled {
            self.buffer.push(TrainingExample {
                features: context,
                label: event.outcome.retention > RETENTION_LABEL_THRESHOLD,
            });
            let due = self.buffer.should_retrain(
                self.config.learner.min_buffer,
                self.config.learner.retrain_interval,
            );
            if due {
                if let Some(report) = self.schedule_retrain() {
                    retrain = Some(report);
                }
            }
        }

        let record = InsightRecord {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            plasticity_score,
            growth_potential: growth.growth_potential,
            growth_confidence: growth.confidence,
            selected_arm: selection.arm,
            reward,
            control_signal,
            fuzzy_confidence: schedule.fuzzy_confidence,
            bandit_stats: self.bandit.statistics(),
            explored_fallback: selection.fallback,
            trained: self.trained,
            training_buffer_len: self.buffer.len(),
            retrain,
            error: if recovered.is_empty() {
                None
            } else {
                Some(recovered.join("; "))
            },
        };

        if self.config.log_insights {
            let _ = logging::log_insight(&record);
        }
        self.events_processed += 1;

        Ok(record)
    }

    /// Probability that material presented with this context is retained.
    ///
    /// Returns `None` until a retrain has completed.
    pub fn predict_retention(&self, context: &[f32]) -> Option<f32> {
        if !self.trained {
            return None;
        }
        Some(self.classifier.predict_proba(context))
    }

    /// Capture the complete engine state.
    pub fn export_snapshot(&self) -> ModelSnapshot {
        ModelSnapshot {
            schema_version: MODEL_SNAPSHOT_VERSION,
            created_at: Utc::now(),
            config: self.config.clone(),
            bandit: self.bandit.snapshot(),
            plasticity: self.plasticity.snapshot(),
            controller: self.controller.snapshot(),
            classifier: self.classifier.get_weights(),
            trained: self.trained,
            examples_seen: self.buffer.seen(),
        }
    }

    /// Replace the full engine state with a snapshot.
    ///
    /// The embedded config and every component are validated before any
    /// live state is touched, so a rejected snapshot leaves the processor
    /// unchanged. Any in-flight background retrain is discarded. Buffered
    /// examples are not part of snapshots; only the accumulation count
    /// carries over.
    pub fn restore_snapshot(&mut self, snapshot: &ModelSnapshot) -> Result<(), CheckpointError> {
        if snapshot.schema_version != MODEL_SNAPSHOT_VERSION {
            return Err(CheckpointError::VersionMismatch {
                expected: MODEL_SNAPSHOT_VERSION,
                found: snapshot.schema_version,
            });
        }
        check_config(&snapshot.config)?;

        let config = snapshot.config.clone();
        let bandit = ContextualBandit::from_snapshot(
            &snapshot.bandit,
            config.n_arms,
            config.augmented_dims(),
        )?;
        let plasticity =
            PlasticityScorer::from_snapshot(&snapshot.plasticity, &config.plasticity)?;
        let controller =
            FuzzyPidController::from_snapshot(&snapshot.controller, config.controller.clone())?;
        let mut classifier = RetentionClassifier::new(classifier_config_for(&config));
        classifier.set_weights(snapshot.classifier.clone())?;

        let mut buffer = TrainingBuffer::new(config.learner.buffer_capacity);
        buffer.set_seen(snapshot.examples_seen);

        self.config = config;
        self.bandit = bandit;
        self.plasticity = plasticity;
        self.controller = controller;
        self.classifier = classifier;
        self.buffer = buffer;
        self.retrainer = BackgroundRetrainer::new();
        self.trained = snapshot.trained;
        Ok(())
    }

    // Context layout: trait features, then the plasticity score, then the
    // theta, alpha and gamma band powers. The classifier consumes the same
    // layout.
    fn augmented_context(&self, event: &SessionEvent, plasticity_score: f32) -> Vec<f32> {
        let mut context = Vec::with_capacity(self.config.augmented_dims());
        context.extend_from_slice(&event.learner_traits);
        context.push(plasticity_score);
        context.push(event.bands.theta_power);
        context.push(event.bands.alpha_power);
        context.push(event.bands.gamma_power);
        context
    }

    fn absorb_background_result(&mut self) -> Option<RetrainReport> {
        match self.retrainer.poll() {
            Some(RetrainMessage::Trained { weights, report }) => {
                if self.classifier.set_weights(weights).is_err() {
                    return None;
                }
                self.trained = true;
                if self.config.log_insights {
                    let _ = logging::log_retrain(&report);
                }
                Some(report)
            }
            _ => None,
        }
    }

    fn schedule_retrain(&mut self) -> Option<RetrainReport> {
        let window = self
            .buffer
            .window(self.config.learner.retrain_window)
            .to_vec();
        let classifier_config = classifier_config_for(&self.config);

        match self.config.learner.retrain_mode {
            RetrainMode::Inline => {
                let (model, report) =
                    train_retention_model(classifier_config, &self.config.learner, &window)?;
                self.classifier = model;
                self.trained = true;
                if self.config.log_insights {
                    let _ = logging::log_retrain(&report);
                }
                Some(report)
            }
            RetrainMode::Background => {
                self.retrainer
                    .begin(classifier_config, self.config.learner.clone(), window);
                None
            }
        }
    }
}

fn classifier_config_for(config: &EngineConfig) -> ClassifierConfig {
    ClassifierConfig {
        input_size: config.augmented_dims(),
        hidden_size: config.learner.hidden_size,
        output_size: 2,
        seed: config.seed,
    }
}

// The per-component checks compare snapshot shapes against the embedded
// config, so nonsense in the config itself has to be rejected first: a
// zero-arm config matches an emptied bandit and every later selection
// would index past the empty score list. Sizes are held to the same
// ranges the TOML parser enforces.
fn check_config(config: &EngineConfig) -> Result<(), CheckpointError> {
    if config.n_arms < 1 || config.n_arms > 64 {
        return Err(CheckpointError::InvalidFormat(format!(
            "config arm count {} is outside 1..=64",
            config.n_arms,
        )));
    }
    if config.trait_dims < 1 || config.trait_dims > 256 {
        return Err(CheckpointError::InvalidFormat(format!(
            "config trait dimensionality {} is outside 1..=256",
            config.trait_dims,
        )));
    }
    if config.learner.hidden_size > 1024 {
        return Err(CheckpointError::InvalidFormat(format!(
            "config hidden size {} exceeds 1024",
            config.learner.hidden_size,
        )));
    }
    if config.learner.batch_size < 1 {
        return Err(CheckpointError::InvalidFormat(
            "config batch size must be at least one".to_string(),
        ));
    }
    let gains = [config.controller.kp, config.controller.ki, config.controller.kd];
    if gains.iter().any(|gain| !gain.is_finite()) {
        return Err(CheckpointError::InvalidFormat(
            "config controller gains must be finite".to_string(),
        ));
    }
    if !config.controller.integral_clamp.is_finite() || config.controller.integral_clamp < 0.0 {
        return Err(CheckpointError::InvalidFormat(
            "config integral clamp must be finite and non-negative".to_string(),
        ));
    }
    Ok(())
}

impl Checkpointable for SessionProcessor {
    fn save_checkpoint<P: AsRef<Path>>(&self, path: P) -> Result<(), CheckpointError> {
        Self::write_snapshot(&self.export_snapshot(), path)
    }

    fn load_checkpoint<P: AsRef<Path>>(path: P) -> Result<Self, CheckpointError> {
        let snapshot: ModelSnapshot = Self::read_snapshot(path)?;
        // Checked here as well because building the interim processor
        // already sizes buffers from the embedded config.
        check_config(&snapshot.config)?;
        let mut processor = SessionProcessor::new(snapshot.config.clone());
        processor.restore_snapshot(&snapshot)?;
        Ok(processor)
    }
}
