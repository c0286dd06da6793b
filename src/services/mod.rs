pub mod analytics;
pub mod artifacts;
pub mod classifier;
pub mod features;
pub mod ingest;
pub mod predictor;
pub mod registry;
pub mod trainer;

pub use artifacts::ArtifactStore;
pub use predictor::PredictionEngine;
pub use registry::ModelRegistry;
pub use trainer::TrainingPipeline;
