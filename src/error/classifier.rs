// Model runtime error types and constants

use crate::error::ErrorCode;
use log::warn;
use std::fmt;

/// Classifier error code constants
///
/// Error code range: 2001-2005
pub struct ClassifierErrorCodes {}

impl ClassifierErrorCodes {
    /// Model input or output length differs from what the handle declares
    pub const SHAPE_MISMATCH: i32 = 2001;

    /// Runtime failed while executing the model
    pub const INFERENCE_FAILED: i32 = 2002;

    /// Runtime returned no probabilities
    pub const EMPTY_OUTPUT: i32 = 2003;

    /// Runtime returned NaN or infinite probabilities
    pub const NON_FINITE_OUTPUT: i32 = 2004;

    /// Model resource could not be loaded
    pub const MODEL_UNAVAILABLE: i32 = 2005;
}

/// Log a classifier error with structured context
///
/// Classifier errors are recovered locally (the rule-based result is used
/// for the window), so they are logged at warn level.
pub fn log_classifier_error(err: &ClassifierError, context: &str) {
    warn!(
        "Classifier error in {}: code={}, component=ModelClassifier, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Model runtime errors
///
/// Error code ranges: 2001-2005
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifierError {
    /// Tensor length mismatch
    ShapeMismatch { expected: usize, actual: usize },

    /// Runtime failure during inference
    InferenceFailed { reason: String },

    /// Zero-length output
    EmptyOutput,

    /// Output contains NaN or infinity
    NonFiniteOutput,

    /// Resource could not be loaded
    ModelUnavailable { path: String },
}

impl ErrorCode for ClassifierError {
    fn code(&self) -> i32 {
        match self {
            ClassifierError::ShapeMismatch { .. } => ClassifierErrorCodes::SHAPE_MISMATCH,
            ClassifierError::InferenceFailed { .. } => ClassifierErrorCodes::INFERENCE_FAILED,
            ClassifierError::EmptyOutput => ClassifierErrorCodes::EMPTY_OUTPUT,
            ClassifierError::NonFiniteOutput => ClassifierErrorCodes::NON_FINITE_OUTPUT,
            ClassifierError::ModelUnavailable { .. } => ClassifierErrorCodes::MODEL_UNAVAILABLE,
        }
    }

    fn message(&self) -> String {
        match self {
            ClassifierError::ShapeMismatch { expected, actual } => {
                format!("Shape mismatch: expected {}, got {}", expected, actual)
            }
            ClassifierError::InferenceFailed { reason } => {
                format!("Inference failed: {}", reason)
            }
            ClassifierError::EmptyOutput => "Model produced no output".to_string(),
            ClassifierError::NonFiniteOutput => {
                "Model produced non-finite probabilities".to_string()
            }
            ClassifierError::ModelUnavailable { path } => {
                format!("Model resource unavailable: {}", path)
            }
        }
    }
}

impl fmt::Display for ClassifierError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ClassifierError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for ClassifierError {}
