//! Retention outcome model
//!
//! Implements a simple MLP (Multi-Layer Perceptron) that maps augmented
//! context vectors to a retained / not-retained probability pair.

use ndarray::{Array1, Array2};
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::checkpoint::CheckpointError;
use crate::learner::training::TrainingExample;

/// Configuration for the classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Input size (augmented context dimensionality)
    pub input_size: usize,
    /// Hidden layer size
    pub hidden_size: usize,
    /// Output size, one logit per retention class
    pub output_size: usize,
    /// Random seed for weight initialization
    pub seed: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            input_size: 12,
            hidden_size: 16,
            output_size: 2,
            seed: 42,
        }
    }
}

/// Trait for retention outcome models
pub trait RetentionModel {
    /// Forward pass, returning class probabilities
    fn forward(&self, features: &[f32]) -> Array1<f32>;

    /// Predict whether the material will be retained
    fn predict(&self, features: &[f32]) -> bool;

    /// Probability assigned to the retained class
    fn predict_proba(&self, features: &[f32]) -> f32;

    /// Compute loss and gradients for a batch
    fn compute_loss(&self, batch: &[TrainingExample]) -> (f32, Gradients);

    /// Update weights using gradients
    fn update_weights(&mut self, gradients: &Gradients, learning_rate: f32);

    /// Get current model parameters (for checkpointing)
    fn get_weights(&self) -> Weights;

    /// Set model parameters, rejecting shapes that do not match the config
    fn set_weights(&mut self, weights: Weights) -> Result<(), CheckpointError>;
}

/// Model weights (for checkpointing and transfer)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Weights {
    pub w1: Vec<f32>,
    pub b1: Vec<f32>,
    pub w2: Vec<f32>,
    pub b2: Vec<f32>,
}

/// Gradients for backpropagation
#[derive(Debug, Clone)]
pub struct Gradients {
    pub dw1: Array2<f32>,
    pub db1: Array1<f32>,
    pub dw2: Array2<f32>,
    pub db2: Array1<f32>,
}

/// Simple MLP: Input → Hidden (ReLU) → Output (Softmax)
pub struct RetentionClassifier {
    config: ClassifierConfig,
    // Layer 1: input → hidden
    w1: Array2<f32>, // [hidden_size, input_size]
    b1: Array1<f32>, // [hidden_size]
    // Layer 2: hidden → output
    w2: Array2<f32>, // [output_size, hidden_size]
    b2: Array1<f32>, // [output_size]
}

impl RetentionClassifier {
    /// Create a new classifier with random initialization
    pub fn new(config: ClassifierConfig) -> Self {
        let mut rng = rand::rngs::StdRng::seed_from_u64(config.seed);

        // Xavier initialization for weights
        let w1_scale = (2.0 / config.input_size as f32).sqrt();
        let w1 = Array2::from_shape_fn((config.hidden_size, config.input_size), |_| {
            (rng.gen::<f32>() - 0.5) * 2.0 * w1_scale
        });

        let b1 = Array1::zeros(config.hidden_size);

        let w2_scale = (2.0 / config.hidden_size as f32).sqrt();
        let w2 = Array2::from_shape_fn((config.output_size, config.hidden_size), |_| {
            (rng.gen::<f32>() - 0.5) * 2.0 * w2_scale
        });

        let b2 = Array1::zeros(config.output_size);

        Self {
            config,
            w1,
            b1,
            w2,
            b2,
        }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Pad or truncate an input slice to the configured input width
    fn input_vector(&self, features: &[f32]) -> Array1<f32> {
        let mut input = Array1::zeros(self.config.input_size);
        for (idx, &value) in features.iter().take(self.config.input_size).enumerate() {
            input[idx] = value;
        }
        input
    }

    /// ReLU activation
    fn relu(x: &Array1<f32>) -> Array1<f32> {
        x.mapv(|v| v.max(0.0))
    }

    /// ReLU derivative
    fn relu_derivative(x: &Array1<f32>) -> Array1<f32> {
        x.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 })
    }

    /// Softmax activation
    fn softmax(x: &Array1<f32>) -> Array1<f32> {
        let max = x.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let exp: Array1<f32> = x.mapv(|v| (v - max).exp());
        let sum: f32 = exp.sum();
        exp / sum
    }

    /// Forward pass with intermediate activations
    fn forward_with_cache(&self, input: &Array1<f32>) -> (Array1<f32>, Array1<f32>, Array1<f32>) {
        // Hidden layer: z1 = W1 * x + b1
        let z1 = self.w1.dot(input) + &self.b1;
        let h1 = Self::relu(&z1);

        // Output layer: z2 = W2 * h1 + b2
        let z2 = self.w2.dot(&h1) + &self.b2;
        let output = Self::softmax(&z2);

        (output, h1, z1)
    }
}

impl RetentionModel for RetentionClassifier {
    fn forward(&self, features: &[f32]) -> Array1<f32> {
        let input = self.input_vector(features);
        let (output, _, _) = self.forward_with_cache(&input);
        output
    }

    fn predict(&self, features: &[f32]) -> bool {
        self.predict_proba(features) >= 0.5
    }

    fn predict_proba(&self, features: &[f32]) -> f32 {
        let probs = self.forward(features);
        probs[1]
    }

    fn compute_loss(&self, batch: &[TrainingExample]) -> (f32, Gradients) {
        let batch_size = batch.len().max(1);

        // Initialize gradient accumulators
        let mut dw1 = Array2::zeros(self.w1.dim());
        let mut db1 = Array1::zeros(self.b1.dim());
        let mut dw2 = Array2::zeros(self.w2.dim());
        let mut db2 = Array1::zeros(self.b2.dim());

        let mut total_loss = 0.0;

        for example in batch {
            let input = self.input_vector(&example.features);
            let (output, h1, z1) = self.forward_with_cache(&input);

            // Cross-entropy loss
            let label_idx = usize::from(example.label);
            let loss = -(output[label_idx].max(1e-9)).ln();
            total_loss += loss;

            // Backward pass
            // Output layer gradient
            let mut dz2 = output.clone();
            dz2[label_idx] -= 1.0; // derivative of softmax + cross-entropy

            // Gradients for W2 and b2
            for i in 0..self.config.output_size {
                for j in 0..self.config.hidden_size {
                    dw2[[i, j]] += dz2[i] * h1[j];
                }
                db2[i] += dz2[i];
            }

            // Hidden layer gradient
            let dh1 = self.w2.t().dot(&dz2);
            let dz1 = &dh1 * &Self::relu_derivative(&z1);

            // Gradients for W1 and b1
            for i in 0..self.config.hidden_size {
                for j in 0..self.config.input_size {
                    dw1[[i, j]] += dz1[i] * input[j];
                }
                db1[i] += dz1[i];
            }
        }

        // Average gradients over batch
        let batch_size_f32 = batch_size as f32;
        dw1 /= batch_size_f32;
        db1 /= batch_size_f32;
        dw2 /= batch_size_f32;
        db2 /= batch_size_f32;

        let avg_loss = total_loss / batch_size_f32;

        (avg_loss, Gradients { dw1, db1, dw2, db2 })
    }

    fn update_weights(&mut self, gradients: &Gradients, learning_rate: f32) {
        // Gradient descent: W = W - lr * dW
        self.w1 = &self.w1 - &(&gradients.dw1 * learning_rate);
        self.b1 = &self.b1 - &(&gradients.db1 * learning_rate);
        self.w2 = &self.w2 - &(&gradients.dw2 * learning_rate);
        self.b2 = &self.b2 - &(&gradients.db2 * learning_rate);
    }

    fn get_weights(&self) -> Weights {
        Weights {
            w1: self.w1.iter().cloned().collect(),
            b1: self.b1.iter().cloned().collect(),
            w2: self.w2.iter().cloned().collect(),
            b2: self.b2.iter().cloned().collect(),
        }
    }

    fn set_weights(&mut self, weights: Weights) -> Result<(), CheckpointError> {
        if weights.b1.len() != self.config.hidden_size
            || weights.b2.len() != self.config.output_size
        {
            return Err(CheckpointError::InvalidFormat(
                "bias vectors do not match the configured layer sizes".to_string(),
            ));
        }

        let w1 = Array2::from_shape_vec(
            (self.config.hidden_size, self.config.input_size),
            weights.w1,
        )
        .map_err(|err| CheckpointError::InvalidFormat(format!("w1 shape: {err}")))?;

        let w2 = Array2::from_shape_vec(
            (self.config.output_size, self.config.hidden_size),
            weights.w2,
        )
        .map_err(|err| CheckpointError::InvalidFormat(format!("w2 shape: {err}")))?;

        self.w1 = w1;
        self.b1 = Array1::from_vec(weights.b1);
        self.w2 = w2;
        self.b2 = Array1::from_vec(weights.b2);
        Ok(())
    }
}
