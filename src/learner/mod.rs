//! Retention learning components
//!
//! This module contains the auxiliary classifier trained on accumulated
//! session outcomes:
//! - `classifier`: MLP mapping augmented contexts to retention probabilities
//! - `training`: example buffer, retrain scheduling and the epoch loop
//! - `background`: worker-thread retraining with non-blocking model swap

pub mod background;
pub mod classifier;
pub mod training;

pub use background::{BackgroundRetrainer, RetrainMessage};
pub use classifier::{ClassifierConfig, Gradients, RetentionClassifier, RetentionModel, Weights};
pub use training::{
    evaluate_accuracy, evaluate_f1, train_retention_model, RetrainReport, TrainingBuffer,
    TrainingExample,
};
