//! Background retraining worker
//!
//! Retraining happens on a copy of the example window so the event path
//! never blocks. The worker trains a fresh model and sends its weights back
//! over a channel; the owner swaps them in whenever it next polls. Results
//! from a dropped retrainer are discarded with it.

use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread;

use crate::config::LearnerConfig;
use crate::learner::classifier::{ClassifierConfig, RetentionModel, Weights};
use crate::learner::training::{train_retention_model, RetrainReport, TrainingExample};

/// Result delivered by a finished worker.
#[derive(Debug)]
pub enum RetrainMessage {
    /// Training completed and produced replacement weights.
    Trained {
        weights: Weights,
        report: RetrainReport,
    },
    /// The window was too small to train on.
    Skipped,
}

/// Owner-side handle for at most one in-flight retrain.
pub struct BackgroundRetrainer {
    tx: Sender<RetrainMessage>,
    rx: Receiver<RetrainMessage>,
    in_flight: bool,
}

impl BackgroundRetrainer {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            tx,
            rx,
            in_flight: false,
        }
    }

    /// True while a worker is still training.
    pub fn is_training(&self) -> bool {
        self.in_flight
    }

    /// Start a retrain on a copy of `examples`.
    ///
    /// Returns false without spawning when a retrain is already running.
    pub fn begin(
        &mut self,
        classifier_config: ClassifierConfig,
        train_config: LearnerConfig,
        examples: Vec<TrainingExample>,
    ) -> bool {
        if self.in_flight {
            return false;
        }

        let tx = self.tx.clone();
        thread::spawn(move || {
            let message =
                match train_retention_model(classifier_config, &train_config, &examples) {
                    Some((model, report)) => RetrainMessage::Trained {
                        weights: model.get_weights(),
                        report,
                    },
                    None => RetrainMessage::Skipped,
                };
            let _ = tx.send(message);
        });

        self.in_flight = true;
        true
    }

    /// Collect a finished result without blocking.
    pub fn poll(&mut self) -> Option<RetrainMessage> {
        match self.rx.try_recv() {
            Ok(message) => {
                self.in_flight = false;
                Some(message)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.in_flight = false;
                None
            }
        }
    }
}

impl Default for BackgroundRetrainer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn wait_for_message(retrainer: &mut BackgroundRetrainer) -> RetrainMessage {
        for _ in 0..500 {
            if let Some(message) = retrainer.poll() {
                return message;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("worker did not report within five seconds");
    }

    fn examples(count: usize) -> Vec<TrainingExample> {
        (0..count)
            .map(|idx| TrainingExample {
                features: vec![if idx % 2 == 0 { 0.9 } else { 0.1 }; 12],
                label: idx % 2 == 0,
            })
            .collect()
    }

    #[test]
    fn worker_delivers_trained_weights() {
        let mut retrainer = BackgroundRetrainer::new();
        let started = retrainer.begin(
            ClassifierConfig::default(),
            LearnerConfig::default(),
            examples(40),
        );
        assert!(started);
        assert!(retrainer.is_training());

        match wait_for_message(&mut retrainer) {
            RetrainMessage::Trained { weights, report } => {
                assert_eq!(report.examples_used, 40);
                assert!(weights.w1.iter().all(|v| v.is_finite()));
            }
            RetrainMessage::Skipped => panic!("expected a trained model"),
        }
        assert!(!retrainer.is_training());
    }

    #[test]
    fn tiny_windows_report_a_skip() {
        let mut retrainer = BackgroundRetrainer::new();
        retrainer.begin(
            ClassifierConfig::default(),
            LearnerConfig::default(),
            examples(4),
        );

        assert!(matches!(
            wait_for_message(&mut retrainer),
            RetrainMessage::Skipped
        ));
    }

    #[test]
    fn only_one_retrain_runs_at_a_time() {
        let mut retrainer = BackgroundRetrainer::new();
        assert!(retrainer.begin(
            ClassifierConfig::default(),
            LearnerConfig::default(),
            examples(40),
        ));
        assert!(!retrainer.begin(
            ClassifierConfig::default(),
            LearnerConfig::default(),
            examples(40),
        ));

        wait_for_message(&mut retrainer);
        assert!(retrainer.begin(
            ClassifierConfig::default(),
            LearnerConfig::default(),
            examples(40),
        ));
        wait_for_message(&mut retrainer);
    }
}
