// Error types for the cough detection pipeline
//
// This module defines custom error types for capture/engine operations and
// for the model runtime, providing structured error handling with numeric
// codes suitable for a host application boundary.

mod audio;
mod classifier;

pub use audio::{log_audio_error, AudioError, AudioErrorCodes};
pub use classifier::{log_classifier_error, ClassifierError, ClassifierErrorCodes};

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, enabling consistent error handling across
/// the host boundary.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}
