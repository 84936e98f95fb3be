//! Retention classifier training
//!
//! Maintains the bounded example buffer, decides when a retrain is due, and
//! runs the epoch loop over a chronological train/validation split.

use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::LearnerConfig;
use crate::learner::classifier::{ClassifierConfig, RetentionClassifier, RetentionModel};

/// Fraction of the window used for training, the rest validates.
const TRAIN_SPLIT: f32 = 0.8;
/// Fewest examples a retrain will accept before skipping.
const MIN_TRAINABLE: usize = 10;

/// One observed (context, label) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingExample {
    pub features: Vec<f32>,
    pub label: bool,
}

/// Metrics from one completed retrain.
#[derive(Debug, Clone, Serialize)]
pub struct RetrainReport {
    pub examples_used: usize,
    pub train_loss: f32,
    pub val_accuracy: f32,
    pub val_f1: f32,
    pub epochs_run: usize,
    pub elapsed_ms: u128,
}

/// Bounded FIFO store of training examples.
///
/// The retrain trigger counts every example ever pushed, so eviction from a
/// full buffer does not stall the retrain cadence.
pub struct TrainingBuffer {
    examples: Vec<TrainingExample>,
    capacity: usize,
    seen: u64,
}

impl TrainingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            examples: Vec::new(),
            capacity: capacity.max(1),
            seen: 0,
        }
    }

    pub fn push(&mut self, example: TrainingExample) {
        self.examples.push(example);
        self.seen += 1;
        if self.examples.len() > self.capacity {
            self.examples.remove(0);
        }
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    /// Total examples ever pushed, including evicted ones.
    pub fn seen(&self) -> u64 {
        self.seen
    }

    pub fn set_seen(&mut self, seen: u64) {
        self.seen = seen;
    }

    /// True exactly when `min_buffer` examples have accumulated and the
    /// count sits on a multiple of `interval`.
    pub fn should_retrain(&self, min_buffer: u64, interval: u64) -> bool {
        let interval = interval.max(1);
        self.seen >= min_buffer && self.seen % interval == 0
    }

    /// The most recent `size` examples, oldest first.
    pub fn window(&self, size: usize) -> &[TrainingExample] {
        let start = self.examples.len().saturating_sub(size);
        &self.examples[start..]
    }
}

/// Fraction of examples the model labels correctly.
pub fn evaluate_accuracy<C: RetentionModel + Sync>(model: &C, examples: &[TrainingExample]) -> f32 {
    if examples.is_empty() {
        return 0.0;
    }

    let correct = examples
        .par_iter()
        .filter(|example| model.predict(&example.features) == example.label)
        .count();

    correct as f32 / examples.len() as f32
}

/// Binary F1 over the retained class. Zero when the model predicts no
/// positives or the data holds none.
pub fn evaluate_f1<C: RetentionModel + Sync>(model: &C, examples: &[TrainingExample]) -> f32 {
    let (tp, fp, fn_count) = examples
        .par_iter()
        .map(|example| {
            let predicted = model.predict(&example.features);
            match (predicted, example.label) {
                (true, true) => (1u32, 0u32, 0u32),
                (true, false) => (0, 1, 0),
                (false, true) => (0, 0, 1),
                (false, false) => (0, 0, 0),
            }
        })
        .reduce(|| (0, 0, 0), |a, b| (a.0 + b.0, a.1 + b.1, a.2 + b.2));

    if tp == 0 {
        return 0.0;
    }
    let precision = tp as f32 / (tp + fp) as f32;
    let recall = tp as f32 / (tp + fn_count) as f32;
    2.0 * precision * recall / (precision + recall)
}

/// Train a fresh classifier on the supplied examples.
///
/// Returns `None` when the window is too small to split into meaningful
/// train and validation sides. Callers treat that as a skip, not a failure.
pub fn train_retention_model(
    classifier_config: ClassifierConfig,
    train_config: &LearnerConfig,
    examples: &[TrainingExample],
) -> Option<(RetentionClassifier, RetrainReport)> {
    if examples.len() < MIN_TRAINABLE {
        return None;
    }

    let split_idx = (examples.len() as f32 * TRAIN_SPLIT) as usize;
    if split_idx == 0 || split_idx == examples.len() {
        return None;
    }
    let (train_data, val_data) = examples.split_at(split_idx);

    let start_time = Instant::now();
    let mut classifier = RetentionClassifier::new(classifier_config);
    let mut current_lr = train_config.learning_rate;
    let mut last_loss = 0.0;

    for epoch in 0..train_config.epochs {
        // Deterministic shuffle keyed on the epoch
        let mut indices: Vec<usize> = (0..train_data.len()).collect();
        indices.sort_by_key(|&i| (i + epoch * 997) % train_data.len());

        let mut epoch_loss = 0.0;
        let mut num_batches = 0;

        for batch_start in (0..indices.len()).step_by(train_config.batch_size) {
            let batch_end = (batch_start + train_config.batch_size).min(indices.len());
            let batch: Vec<TrainingExample> = indices[batch_start..batch_end]
                .iter()
                .map(|&idx| train_data[idx].clone())
                .collect();

            let (loss, gradients) = classifier.compute_loss(&batch);
            classifier.update_weights(&gradients, current_lr);
            epoch_loss += loss;
            num_batches += 1;
        }

        if num_batches > 0 {
            last_loss = epoch_loss / num_batches as f32;
        }
        current_lr *= train_config.lr_decay;
    }

    let report = RetrainReport {
        examples_used: examples.len(),
        train_loss: last_loss,
        val_accuracy: evaluate_accuracy(&classifier, val_data),
        val_f1: evaluate_f1(&classifier, val_data),
        epochs_run: train_config.epochs,
        elapsed_ms: start_time.elapsed().as_millis(),
    };

    Some((classifier, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, Array1};

    use crate::checkpoint::CheckpointError;
    use crate::learner::classifier::{Gradients, Weights};

    struct AlwaysRetained;

    impl RetentionModel for AlwaysRetained {
        fn forward(&self, _features: &[f32]) -> Array1<f32> {
            arr1(&[0.0, 1.0])
        }

        fn predict(&self, _features: &[f32]) -> bool {
            true
        }

        fn predict_proba(&self, _features: &[f32]) -> f32 {
            1.0
        }

        fn compute_loss(&self, _batch: &[TrainingExample]) -> (f32, Gradients) {
            unimplemented!("constant model has no gradients")
        }

        fn update_weights(&mut self, _gradients: &Gradients, _learning_rate: f32) {}

        fn get_weights(&self) -> Weights {
            unimplemented!("constant model has no weights")
        }

        fn set_weights(&mut self, _weights: Weights) -> Result<(), CheckpointError> {
            Ok(())
        }
    }

    fn example(level: f32, label: bool) -> TrainingExample {
        TrainingExample {
            features: vec![level; 12],
            label,
        }
    }

    fn separable_examples(count: usize) -> Vec<TrainingExample> {
        (0..count)
            .map(|idx| {
                if idx % 2 == 0 {
                    example(0.9, true)
                } else {
                    example(0.1, false)
                }
            })
            .collect()
    }

    #[test]
    fn buffer_evicts_oldest_past_capacity() {
        let mut buffer = TrainingBuffer::new(3);
        for level in 0..5 {
            buffer.push(example(level as f32, true));
        }
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.seen(), 5);
        assert!((buffer.window(3)[0].features[0] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn retrain_trigger_fires_on_exact_boundaries() {
        let mut buffer = TrainingBuffer::new(1000);
        let mut fired = Vec::new();
        for step in 1..=100u64 {
            buffer.push(example(0.5, true));
            if buffer.should_retrain(50, 25) {
                fired.push(step);
            }
        }
        assert_eq!(fired, vec![50, 75, 100]);
    }

    #[test]
    fn window_returns_most_recent_examples() {
        let mut buffer = TrainingBuffer::new(100);
        for level in 0..10 {
            buffer.push(example(level as f32, false));
        }
        let window = buffer.window(4);
        assert_eq!(window.len(), 4);
        assert!((window[0].features[0] - 6.0).abs() < 1e-6);
        assert!((window[3].features[0] - 9.0).abs() < 1e-6);
    }

    #[test]
    fn accuracy_of_constant_model_matches_label_share() {
        let examples = vec![
            example(0.1, true),
            example(0.2, true),
            example(0.3, false),
            example(0.4, false),
        ];
        let accuracy = evaluate_accuracy(&AlwaysRetained, &examples);
        assert!((accuracy - 0.5).abs() < 1e-6);
    }

    #[test]
    fn f1_of_constant_model_matches_manual_computation() {
        let examples = vec![
            example(0.1, true),
            example(0.2, true),
            example(0.3, false),
            example(0.4, false),
        ];
        // Precision 0.5, recall 1.0.
        let f1 = evaluate_f1(&AlwaysRetained, &examples);
        assert!((f1 - 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn f1_is_zero_without_positive_labels() {
        let examples = vec![example(0.1, false), example(0.2, false)];
        let model = RetentionClassifier::new(ClassifierConfig::default());
        // No true labels means no true positives regardless of predictions.
        let f1 = evaluate_f1(&model, &examples);
        assert!((f1 - 0.0).abs() < 1e-6);
    }

    #[test]
    fn tiny_windows_skip_training() {
        let config = LearnerConfig::default();
        let examples = separable_examples(5);
        let result = train_retention_model(ClassifierConfig::default(), &config, &examples);
        assert!(result.is_none());
    }

    #[test]
    fn training_separates_easy_classes() {
        let config = LearnerConfig {
            epochs: 40,
            ..LearnerConfig::default()
        };
        let examples = separable_examples(40);

        let (classifier, report) =
            train_retention_model(ClassifierConfig::default(), &config, &examples)
                .expect("enough examples to train");

        assert_eq!(report.examples_used, 40);
        assert_eq!(report.epochs_run, 40);
        assert!(report.train_loss.is_finite());
        assert!(report.val_accuracy >= 0.5);
        assert!(classifier.get_weights().w1.iter().all(|v| v.is_finite()));
    }
}
