//! Core land/water change processing modules

pub mod preprocess;
pub mod merge;
pub mod composite;
pub mod indices;
pub mod classify;
pub mod vectorize;
pub mod area;
pub mod change;
pub mod pipeline;

// Re-export main types
pub use preprocess::{BandSchema, PreprocessParams, QaBits, ScenePreprocessor};
pub use merge::{harmonized_series, merge_collections};
pub use composite::{Composite, CompositeParams, CompositeStatus, TemporalCompositor};
pub use indices::{add_indices, index_composite, normalized_difference};
pub use classify::{Classifier, ClassifierParams, Mask, MaskKind};
pub use vectorize::{ShorelineFeature, ShorelineSet, VectorizeParams, Vectorizer};
pub use area::{AreaCalculator, AreaStatistic};
pub use change::{ChangeReport, ChangeReporter};
pub use pipeline::{ChangeAnalysis, CoastalChangePipeline, EpochResult};
