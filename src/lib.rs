//! # NeuroAdapt Core
//!
//! A deterministic Rust engine that closes the loop between observed learning
//! sessions and the content adaptations chosen for them. Each event is scored
//! for neuroplasticity and routed through a contextual Thompson Sampling
//! bandit that picks the next content variant. A fuzzy gain-scheduled PID
//! signal steers adaptation intensity toward its target, and accumulated
//! outcomes feed an auxiliary retention classifier that retrains on a
//! background thread.
//!
//! ## Quick Start
//!
//! ```rust
//! use neuroadapt_core::{
//!     EngineConfig, FeatureBands, SessionEvent, SessionOutcome, SessionProcessor,
//! };
//!
//! let mut processor = SessionProcessor::new(EngineConfig::default());
//!
//! let event = SessionEvent {
//!     learner_traits: vec![0.5; 8],
//!     bands: FeatureBands { theta_power: 0.6, alpha_power: 0.5, gamma_power: 0.4 },
//!     outcome: SessionOutcome { retention: 0.8, improvement: 0.7, adaptation: 0.5 },
//!     target_engagement: 0.7,
//! };
//!
//! let insight = processor.process(&event).unwrap();
//! println!(
//!     "arm {} reward {:.2} signal {:.3}",
//!     insight.selected_arm, insight.reward, insight.control_signal
//! );
//! ```
//!
//! ## Core Modules
//!
//! - [`config`] - Engine configuration via TOML
//! - [`bandit`] - Contextual Thompson Sampling over content arms
//! - [`plasticity`] - Neuroplasticity scoring and growth trends
//! - [`control`] - Fuzzy gain-scheduled PID steering
//! - [`session`] - The event loop tying every component together
//! - [`logging`] - JSON line-delimited logging

pub mod bandit;
pub mod checkpoint;
pub mod config;
pub mod control;
pub mod learner;
pub mod logging;
pub mod plasticity;
pub mod session;

pub use bandit::{ArmSelection, ArmStatistics, BanditError, BanditStatistics, ContextualBandit};
pub use checkpoint::{CheckpointError, Checkpointable};
pub use config::{ControllerConfig, EngineConfig, LearnerConfig, PlasticityConfig, RetrainMode};
pub use control::{FuzzyPidController, GainSchedule};
pub use learner::{
    train_retention_model, BackgroundRetrainer, ClassifierConfig, RetentionClassifier,
    RetentionModel, RetrainMessage, RetrainReport, TrainingBuffer, TrainingExample,
};
pub use plasticity::{FeatureBands, GrowthEstimate, PlasticityScorer, SessionOutcome};
pub use session::{
    InsightRecord, ModelSnapshot, SessionError, SessionEvent, SessionProcessor,
    MODEL_SNAPSHOT_VERSION,
};
