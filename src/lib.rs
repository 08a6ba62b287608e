//! coastwatch: multi-decadal coastal land/water change from Landsat imagery
//!
//! Builds cloud-masked median composites for two years from Landsat 5, 7, 8
//! and 9 Collection 2 surface reflectance, derives NDVI/NDWI, classifies water
//! and land, vectorizes the water boundary and reports land area lost between
//! the two epochs.

pub mod types;
pub mod config;
pub mod io;
pub mod core;

#[cfg(feature = "python")]
mod python;

// Re-export main types and functions for easier access
pub use types::{
    Band, BoundingBox, CanonicalBand, CoastalError, CoastalResult, CoordinateSystem, GeoTransform,
    GridSpec, RasterImage, SensorFamily,
};

pub use config::AnalysisConfig;
pub use io::{ImageCollection, InMemoryCollection, LazyCollection, SceneCatalog, SceneLoader};
pub use crate::core::{ChangeAnalysis, ChangeReport, CoastalChangePipeline};
