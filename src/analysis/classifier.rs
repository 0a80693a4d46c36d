// Classifier - cough / not-cough decision for one window
//
// Two strategies share one interface:
//
// RuleBased: fixed-weight scoring over the FeatureVector, no dependencies
// Model: delegates to a loaded ModelHandle and falls back to the rule-based
//        decision for any window whose inference fails
//
// The strategy is chosen once per session by `Classifier::select` and never
// changes afterwards. Each strategy has its own fixed decision threshold, so
// `is_cough` is always a pure function of `confidence`.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::features::FeatureVector;
use super::model::{ModelHandle, ModelOutputKind, ModelRuntime};
use crate::error::{log_classifier_error, ClassifierError};
use crate::telemetry::{LatencyTracker, SessionStats};

/// Rule-based decision threshold
pub const RULE_COUGH_THRESHOLD: f32 = 0.6;

/// Threshold on the best cough-related class of a 521-way model
pub const YAMNET_COUGH_THRESHOLD: f32 = 0.3;

/// Threshold for binary and generic model outputs
pub const MODEL_COUGH_THRESHOLD: f32 = 0.5;

/// Cough, throat clearing, sneeze, sniff, burp, belch
pub const COUGH_CLASS_INDICES: [usize; 6] = [0, 1, 2, 3, 4, 5];

/// Entries reported from large model outputs
const REPORTED_PROBABILITIES: usize = 10;

/// Inference timings kept for the rolling average
const LATENCY_WINDOW: usize = 50;

const WEIGHT_AMPLITUDE: f32 = 0.25;
const WEIGHT_ZCR: f32 = 0.20;
const WEIGHT_CENTROID: f32 = 0.25;
const WEIGHT_ROLLOFF: f32 = 0.15;
const WEIGHT_MEL: f32 = 0.15;
const AGREEMENT_BONUS: f32 = 0.10;

/// Outcome of classifying one window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationResult {
    pub is_cough: bool,
    /// Always within 0.0..=1.0
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_probabilities: Option<Vec<f32>>,
}

/// Which strategy a session ended up with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassifierKind {
    Model,
    RuleBased,
}

/// Deterministic scoring over five feature predicates
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedClassifier;

impl RuleBasedClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Raw weighted score and number of predicates that held
    pub fn score(&self, features: &FeatureVector) -> (f32, usize) {
        let predicates = [
            (features.amplitude > 0.08, WEIGHT_AMPLITUDE),
            (
                features.zero_crossing_rate > 0.03 && features.zero_crossing_rate < 0.25,
                WEIGHT_ZCR,
            ),
            (
                features.spectral_centroid_hz > 800.0 && features.spectral_centroid_hz < 3000.0,
                WEIGHT_CENTROID,
            ),
            (
                features.spectral_rolloff_hz > 2000.0 && features.spectral_rolloff_hz < 6000.0,
                WEIGHT_ROLLOFF,
            ),
            (features.mel_energy_score > 0.1, WEIGHT_MEL),
        ];

        let mut score = 0.0;
        let mut matched = 0;
        for (holds, weight) in predicates {
            if holds {
                score += weight;
                matched += 1;
            }
        }

        if matched >= 3 {
            score += AGREEMENT_BONUS;
        }
        if matched >= 4 {
            score += AGREEMENT_BONUS;
        }

        (score, matched)
    }

    pub fn classify(&self, features: &FeatureVector) -> ClassificationResult {
        let (score, _) = self.score(features);
        let confidence = score.min(1.0);
        let is_cough = confidence > RULE_COUGH_THRESHOLD;

        let class_probabilities = if is_cough {
            vec![confidence, confidence * 0.7, confidence * 0.3, 0.0, 0.0, 0.0]
        } else {
            vec![0.0; COUGH_CLASS_INDICES.len()]
        };

        ClassificationResult {
            is_cough,
            confidence,
            class_probabilities: Some(class_probabilities),
        }
    }
}

/// Classifier backed by a loaded model
pub struct ModelClassifier {
    handle: Box<dyn ModelHandle>,
    input_len: usize,
    fallback: RuleBasedClassifier,
    stats: Arc<SessionStats>,
    latency: LatencyTracker,
    input: Vec<f32>,
}

impl ModelClassifier {
    /// # Arguments
    /// * `handle` - Loaded model
    /// * `default_input_len` - Used when the model cannot report its input size
    /// * `stats` - Session counters; fallbacks and timings are recorded here
    pub fn new(
        handle: Box<dyn ModelHandle>,
        default_input_len: usize,
        stats: Arc<SessionStats>,
    ) -> Self {
        let input_len = handle.input_len().unwrap_or(default_input_len).max(1);
        Self {
            handle,
            input_len,
            fallback: RuleBasedClassifier::new(),
            stats,
            latency: LatencyTracker::new(LATENCY_WINDOW),
            input: vec![0.0; input_len],
        }
    }

    pub fn input_len(&self) -> usize {
        self.input_len
    }

    pub fn output_kind(&self) -> Option<ModelOutputKind> {
        self.handle.output_len().map(ModelOutputKind::from_len)
    }

    /// Classify through the model, substituting the rule-based result when
    /// inference fails for this window
    pub fn classify(&mut self, samples: &[f32], features: &FeatureVector) -> ClassificationResult {
        match self.try_classify(samples) {
            Ok(result) => result,
            Err(err) => {
                log_classifier_error(&err, "ModelClassifier::classify");
                self.stats.record_model_fallback();
                self.fallback.classify(features)
            }
        }
    }

    /// Model path only; errors are returned instead of absorbed
    pub fn try_classify(
        &mut self,
        samples: &[f32],
    ) -> Result<ClassificationResult, ClassifierError> {
        self.prepare_input(samples);

        let started = Instant::now();
        let output = self.handle.infer(&self.input)?;
        let elapsed_us = started.elapsed().as_secs_f32() * 1_000_000.0;

        let (avg_us, max_us, _) = self.latency.observe(elapsed_us);
        self.stats.record_inference_latency(avg_us, max_us);

        if let Some(expected) = self.handle.output_len() {
            if output.len() != expected {
                return Err(ClassifierError::ShapeMismatch {
                    expected,
                    actual: output.len(),
                });
            }
        }

        let result = interpret_output(&output)?;
        log::debug!(
            "[Classifier] Inference took {:.2} ms (avg {:.2} ms), cough: {}, confidence: {:.3}",
            elapsed_us / 1000.0,
            avg_us / 1000.0,
            result.is_cough,
            result.confidence
        );
        Ok(result)
    }

    /// Zero-pad or truncate to the model length and clamp to [-1, 1]
    fn prepare_input(&mut self, samples: &[f32]) {
        let copied = samples.len().min(self.input_len);
        for (dst, &src) in self.input[..copied].iter_mut().zip(samples) {
            *dst = src.clamp(-1.0, 1.0);
        }
        self.input[copied..].fill(0.0);
    }
}

/// Turn raw model probabilities into a decision, by output cardinality
pub fn interpret_output(output: &[f32]) -> Result<ClassificationResult, ClassifierError> {
    if output.is_empty() {
        return Err(ClassifierError::EmptyOutput);
    }
    if output.iter().any(|p| !p.is_finite()) {
        return Err(ClassifierError::NonFiniteOutput);
    }

    let (score, threshold, reported) = match ModelOutputKind::from_len(output.len()) {
        ModelOutputKind::Yamnet521 => {
            let best = COUGH_CLASS_INDICES
                .iter()
                .map(|&i| output[i])
                .fold(0.0_f32, f32::max);
            (best, YAMNET_COUGH_THRESHOLD, REPORTED_PROBABILITIES)
        }
        ModelOutputKind::Binary => (output[1], MODEL_COUGH_THRESHOLD, output.len()),
        ModelOutputKind::Generic(_) => {
            let best = output.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            (best, MODEL_COUGH_THRESHOLD, REPORTED_PROBABILITIES)
        }
    };

    let confidence = score.clamp(0.0, 1.0);
    Ok(ClassificationResult {
        is_cough: confidence > threshold,
        confidence,
        class_probabilities: Some(output.iter().take(reported).copied().collect()),
    })
}

/// The strategy selected for a session
pub enum Classifier {
    Model(ModelClassifier),
    RuleBased(RuleBasedClassifier),
}

impl Classifier {
    /// Pick the strategy for a new session
    ///
    /// Tries to load `resource_path` through `runtime`; any failure selects the
    /// rule-based classifier for the whole session. Never fails.
    pub fn select(
        runtime: &dyn ModelRuntime,
        resource_path: Option<&str>,
        default_input_len: usize,
        stats: Arc<SessionStats>,
    ) -> Self {
        let Some(path) = resource_path.filter(|p| !p.is_empty()) else {
            log::info!("[Classifier] No model resource configured, using rule-based classifier");
            return Classifier::RuleBased(RuleBasedClassifier::new());
        };

        match runtime.load(path) {
            Some(handle) => {
                let model = ModelClassifier::new(handle, default_input_len, stats);
                log::info!(
                    "[Classifier] Loaded model {} (input {} samples, output {:?})",
                    path,
                    model.input_len(),
                    model.output_kind()
                );
                Classifier::Model(model)
            }
            None => {
                log_classifier_error(
                    &ClassifierError::ModelUnavailable {
                        path: path.to_string(),
                    },
                    "Classifier::select",
                );
                log::info!("[Classifier] Falling back to rule-based classifier for this session");
                Classifier::RuleBased(RuleBasedClassifier::new())
            }
        }
    }

    pub fn kind(&self) -> ClassifierKind {
        match self {
            Classifier::Model(_) => ClassifierKind::Model,
            Classifier::RuleBased(_) => ClassifierKind::RuleBased,
        }
    }

    pub fn classify(&mut self, samples: &[f32], features: &FeatureVector) -> ClassificationResult {
        match self {
            Classifier::Model(model) => model.classify(samples, features),
            Classifier::RuleBased(rules) => rules.classify(features),
        }
    }
}

#[cfg(test)]
#[path = "classifier_tests.rs"]
mod tests;
