// Analysis module - per-window feature extraction and classification
//
// Pipeline, run on the analysis thread for the newest captured window:
// FeatureExtractor -> Classifier (model or rule-based) -> DetectionEvent
//
// Nothing in here touches the audio device. The worker receives windows
// through the buffer pool queues and publishes its results on the EventBus.

pub mod classifier;
pub mod features;
pub mod model;
pub mod worker;

pub use classifier::{
    interpret_output, ClassificationResult, Classifier, ClassifierKind, ModelClassifier,
    RuleBasedClassifier, RULE_COUGH_THRESHOLD,
};
pub use features::{FeatureExtractor, FeatureVector};
pub use model::{ModelHandle, ModelOutputKind, ModelRuntime, NoModelRuntime};
pub use worker::{
    spawn_analysis_thread, AnalysisThread, AnalysisWorker, PipelineSink, WindowOutcome,
    WorkerContext,
};
