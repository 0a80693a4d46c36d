//! Model runtime collaborator.
//!
//! The inference engine itself lives outside this crate. A host plugs one in
//! by implementing [`ModelRuntime`]; the engine asks it once per session to
//! load a resource, and the returned [`ModelHandle`] is owned by the analysis
//! thread from then on.

use crate::error::ClassifierError;

/// Loads trained models
pub trait ModelRuntime: Send + Sync {
    /// `None` means the resource is unavailable; this is not an error
    fn load(&self, resource_path: &str) -> Option<Box<dyn ModelHandle>>;
}

/// A loaded model, used from a single thread at a time
pub trait ModelHandle: Send {
    /// Number of input samples the model expects, if it can tell
    fn input_len(&self) -> Option<usize>;

    /// Number of output probabilities, if it can tell
    fn output_len(&self) -> Option<usize>;

    fn infer(&mut self, input: &[f32]) -> Result<Vec<f32>, ClassifierError>;
}

/// Runtime used when the host provides none: every load is unavailable
#[derive(Debug, Clone, Copy, Default)]
pub struct NoModelRuntime;

impl ModelRuntime for NoModelRuntime {
    fn load(&self, resource_path: &str) -> Option<Box<dyn ModelHandle>> {
        log::info!(
            "[Classifier] No model runtime available, ignoring {}",
            resource_path
        );
        None
    }
}

/// How a model's output vector is interpreted, by cardinality
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelOutputKind {
    /// AudioSet-style 521 classes; indices 0..=5 are cough-related
    Yamnet521,
    /// `[not cough, cough]`
    Binary,
    Generic(usize),
}

impl ModelOutputKind {
    pub fn from_len(len: usize) -> Self {
        match len {
            521 => ModelOutputKind::Yamnet521,
            2 => ModelOutputKind::Binary,
            n => ModelOutputKind::Generic(n),
        }
    }
}
