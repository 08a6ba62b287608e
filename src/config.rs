//! Analysis configuration
//!
//! Defaults reproduce the reference scenario: the Florida Keys study area,
//! a 1990 → 2020 comparison at 30 m, and the NDWI > 0 water rule.

use crate::types::{BoundingBox, CoastalError, CoastalResult, CoordinateSystem, GridSpec, METERS_PER_DEGREE};
use geo::{BoundingRect, Coord, LineString, Polygon};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// NDWI value above which a pixel is classified as water.
///
/// Fixed at 0 in the reference analysis and not calibrated per scene.
/// Exposed through [`AnalysisConfig::water_threshold`] so it can be validated
/// against ground truth.
pub const DEFAULT_WATER_THRESHOLD: f32 = 0.0;

/// Nominal Landsat resolution in meters
pub const DEFAULT_SCALE_M: f64 = 30.0;

/// Pixel ceiling for vectorization (1e12)
pub const DEFAULT_VECTORIZE_MAX_PIXELS: u64 = 1_000_000_000_000;

/// Pixel ceiling for region reductions (1e13)
pub const DEFAULT_AREA_MAX_PIXELS: u64 = 10_000_000_000_000;

/// Grid rows reduced per compositing pass
pub const DEFAULT_COMPOSITE_TILE_ROWS: usize = 256;

/// The two epochs compared by the analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Epochs {
    /// Year A, chronologically first
    pub before: i32,
    /// Year B
    pub after: i32,
}

impl Default for Epochs {
    fn default() -> Self {
        Self { before: 1990, after: 2020 }
    }
}

/// Analysis grid definition
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridConfig {
    pub crs: CoordinateSystem,
    /// Pixel size in CRS units (degrees for geographic grids)
    pub pixel_size: f64,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            crs: CoordinateSystem::Geographic,
            pixel_size: DEFAULT_SCALE_M / METERS_PER_DEGREE,
        }
    }
}

/// Scale and pixel ceiling for a region-wide reduction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReductionParams {
    /// Nominal resolution of the reduction in meters
    pub scale: f64,
    /// Fail instead of processing more pixels than this
    pub max_pixels: u64,
}

impl ReductionParams {
    pub fn check(&self, operation: &'static str, requested: u64) -> CoastalResult<()> {
        if requested > self.max_pixels {
            return Err(CoastalError::ResourceLimitExceeded {
                operation,
                limit: self.max_pixels,
                requested,
            });
        }
        Ok(())
    }
}

/// Linear rescaling of raw digital numbers to surface reflectance
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReflectanceScaling {
    pub multiply: f32,
    pub add: f32,
}

impl ReflectanceScaling {
    /// Landsat Collection 2 Level-2 surface reflectance factors
    pub const COLLECTION2: ReflectanceScaling = ReflectanceScaling {
        multiply: 2.75e-5,
        add: -0.2,
    };
}

/// Complete configuration of a coastal change run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Exterior ring of the area of interest, `[x, y]` in grid CRS units
    pub aoi: Vec<[f64; 2]>,
    pub epochs: Epochs,
    pub grid: GridConfig,
    pub water_threshold: f32,
    pub vectorize: ReductionParams,
    /// Treat diagonal neighbours as connected when vectorizing
    pub eight_connected: bool,
    pub area: ReductionParams,
    /// Rows per compositing tile; bounds the samples held in memory at once
    pub composite_tile_rows: usize,
    /// `None` keeps raw digital numbers, as the reference analysis does
    pub reflectance_scaling: Option<ReflectanceScaling>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            aoi: vec![
                [-82.9, 27.5],
                [-82.9, 24.5],
                [-79.8, 24.5],
                [-79.8, 27.5],
            ],
            epochs: Epochs::default(),
            grid: GridConfig::default(),
            water_threshold: DEFAULT_WATER_THRESHOLD,
            vectorize: ReductionParams {
                scale: DEFAULT_SCALE_M,
                max_pixels: DEFAULT_VECTORIZE_MAX_PIXELS,
            },
            eight_connected: true,
            area: ReductionParams {
                scale: DEFAULT_SCALE_M,
                max_pixels: DEFAULT_AREA_MAX_PIXELS,
            },
            composite_tile_rows: DEFAULT_COMPOSITE_TILE_ROWS,
            reflectance_scaling: None,
        }
    }
}

impl AnalysisConfig {
    /// Load and validate a JSON configuration file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> CoastalResult<Self> {
        log::info!("Loading analysis configuration: {}", path.as_ref().display());
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: AnalysisConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CoastalResult<()> {
        if self.aoi.len() < 3 {
            return Err(CoastalError::Config(format!(
                "AOI needs at least 3 vertices, got {}",
                self.aoi.len()
            )));
        }
        if self.aoi.iter().flatten().any(|v| !v.is_finite()) {
            return Err(CoastalError::Config("AOI contains non-finite coordinates".to_string()));
        }
        if self.epochs.before >= self.epochs.after {
            return Err(CoastalError::Config(format!(
                "epoch A ({}) must precede epoch B ({})",
                self.epochs.before, self.epochs.after
            )));
        }
        if !(self.grid.pixel_size > 0.0 && self.grid.pixel_size.is_finite()) {
            return Err(CoastalError::Config(format!(
                "grid pixel size must be positive, got {}",
                self.grid.pixel_size
            )));
        }
        if !self.water_threshold.is_finite() {
            return Err(CoastalError::Config("water threshold must be finite".to_string()));
        }
        if self.composite_tile_rows == 0 {
            return Err(CoastalError::Config("composite_tile_rows must be non-zero".to_string()));
        }
        for (name, params) in [("vectorize", &self.vectorize), ("area", &self.area)] {
            if !(params.scale > 0.0 && params.scale.is_finite()) {
                return Err(CoastalError::Config(format!(
                    "{} scale must be positive, got {}",
                    name, params.scale
                )));
            }
            if params.max_pixels == 0 {
                return Err(CoastalError::Config(format!("{} max_pixels must be non-zero", name)));
            }
        }
        Ok(())
    }

    /// AOI as a polygon
    pub fn aoi_polygon(&self) -> Polygon<f64> {
        let coords: Vec<Coord<f64>> = self.aoi.iter().map(|&[x, y]| Coord { x, y }).collect();
        Polygon::new(LineString::from(coords), vec![])
    }

    /// Analysis grid covering the AOI bounding box
    pub fn target_grid(&self) -> CoastalResult<GridSpec> {
        let rect = self
            .aoi_polygon()
            .bounding_rect()
            .ok_or_else(|| CoastalError::Config("AOI is empty".to_string()))?;
        let bbox = BoundingBox {
            min_lon: rect.min().x,
            max_lon: rect.max().x,
            min_lat: rect.min().y,
            max_lat: rect.max().y,
        };
        Ok(GridSpec::covering(&bbox, self.grid.pixel_size, self.grid.crs))
    }
}
