//! Two-epoch coastal change workflow
//!
//! raw per-sensor collections → harmonised, merged collection → yearly
//! composites → NDVI/NDWI → water/land masks → {shoreline polygons, land
//! area} → change report. The two epochs share no state and are evaluated
//! concurrently when the `parallel` feature is enabled.

use crate::config::AnalysisConfig;
use crate::core::area::{AreaCalculator, AreaStatistic};
use crate::core::change::{ChangeReport, ChangeReporter};
use crate::core::classify::{Classifier, ClassifierParams, Mask};
use crate::core::composite::{Composite, CompositeParams, TemporalCompositor};
use crate::core::indices::index_composite;
use crate::core::merge::harmonized_series;
use crate::core::preprocess::{PreprocessParams, ScenePreprocessor};
use crate::core::vectorize::{ShorelineSet, VectorizeParams, Vectorizer};
use crate::io::catalog::SceneCatalog;
use crate::io::collection::{ImageCollection, LazyCollection, SceneLoader};
use crate::types::{CoastalResult, SensorFamily};
use geo::Polygon;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Everything derived for one epoch
#[derive(Debug, Clone)]
pub struct EpochResult {
    pub year: i32,
    /// Composite with the harmonised bands plus NDVI and NDWI
    pub composite: Composite,
    pub water_mask: Mask,
    pub land_mask: Mask,
    /// Polygons of the self-masked water mask
    pub shorelines: ShorelineSet,
    pub land_area: AreaStatistic,
}

/// Output of a full before/after run
#[derive(Debug, Clone)]
pub struct ChangeAnalysis {
    pub before: EpochResult,
    pub after: EpochResult,
    pub report: ChangeReport,
}

/// Configured land/water change analysis
pub struct CoastalChangePipeline {
    config: AnalysisConfig,
    aoi: Polygon<f64>,
    preprocessor: ScenePreprocessor,
    compositor: TemporalCompositor,
    classifier: Classifier,
    vectorizer: Vectorizer,
    area_calculator: AreaCalculator,
    reporter: ChangeReporter,
}

impl CoastalChangePipeline {
    pub fn new(config: AnalysisConfig) -> CoastalResult<Self> {
        config.validate()?;
        let aoi = config.aoi_polygon();
        let grid = config.target_grid()?;
        log::info!(
            "Coastal change pipeline: {} -> {}, grid {}x{} ({:?})",
            config.epochs.before,
            config.epochs.after,
            grid.rows,
            grid.cols,
            grid.crs
        );

        Ok(Self {
            preprocessor: ScenePreprocessor::new(PreprocessParams {
                reflectance_scaling: config.reflectance_scaling,
            }),
            compositor: TemporalCompositor::with_params(
                grid,
                &aoi,
                CompositeParams { tile_rows: config.composite_tile_rows, ..CompositeParams::default() },
            ),
            classifier: Classifier::new(ClassifierParams { threshold: config.water_threshold }),
            vectorizer: Vectorizer::new(VectorizeParams {
                scale: config.vectorize.scale,
                max_pixels: config.vectorize.max_pixels,
                eight_connected: config.eight_connected,
            }),
            area_calculator: AreaCalculator::new(config.area),
            reporter: ChangeReporter::new(),
            aoi,
            config,
        })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn aoi(&self) -> &Polygon<f64> {
        &self.aoi
    }

    /// Preprocess raw per-sensor collections and merge them into one series
    pub fn harmonize<C: ImageCollection>(&self, per_sensor: BTreeMap<SensorFamily, C>) -> CoastalResult<C> {
        harmonized_series(per_sensor, &self.preprocessor, &self.aoi)
    }

    /// Full analysis over every scene of a catalog.
    ///
    /// Scenes are matched against the AOI in the grid's CRS; for projected
    /// grids only products whose metadata places them in that projection take part.
    pub fn run_catalog<L>(&self, catalog: &SceneCatalog, loader: Arc<L>) -> CoastalResult<ChangeAnalysis>
    where
        L: SceneLoader + 'static,
    {
        let merged: LazyCollection<L> = self.harmonize(catalog.collections(loader, self.config.grid.crs))?;
        self.run(&merged)
    }

    /// Full analysis over an already harmonised and merged collection
    pub fn run<C>(&self, merged: &C) -> CoastalResult<ChangeAnalysis>
    where
        C: ImageCollection + Clone + Sync,
    {
        let (year_a, year_b) = (self.config.epochs.before, self.config.epochs.after);

        #[cfg(feature = "parallel")]
        let (before, after) = rayon::join(|| self.run_epoch(merged, year_a), || self.run_epoch(merged, year_b));
        #[cfg(not(feature = "parallel"))]
        let (before, after) = (self.run_epoch(merged, year_a), self.run_epoch(merged, year_b));

        let (before, after) = (before?, after?);
        let report = self.reporter.report(&before.land_area, &after.land_area)?;
        Ok(ChangeAnalysis { before, after, report })
    }

    /// Composite, classify, vectorize and measure one year
    pub fn run_epoch<C>(&self, merged: &C, year: i32) -> CoastalResult<EpochResult>
    where
        C: ImageCollection + Clone,
    {
        let composite = index_composite(self.compositor.composite_year(merged, year)?)?;
        let water_mask = self.classifier.water_mask(&composite)?;
        let land_mask = self.classifier.land_mask(&composite)?;
        let shorelines = self.vectorizer.vectorize(&water_mask, &self.aoi)?;
        let land_area = self.area_calculator.area(&land_mask, &self.aoi)?;

        Ok(EpochResult { year, composite, water_mask, land_mask, shorelines, land_area })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Epochs, GridConfig};
    use crate::io::collection::InMemoryCollection;
    use crate::types::{Band, CoordinateSystem, RasterImage, QA_PIXEL_BAND};
    use approx::assert_relative_eq;
    use chrono::NaiveDate;
    use ndarray::Array2;

    fn config() -> AnalysisConfig {
        AnalysisConfig {
            aoi: vec![[0.0, 0.0], [120.0, 0.0], [120.0, 60.0], [0.0, 60.0]],
            epochs: Epochs { before: 1990, after: 2020 },
            grid: GridConfig { crs: CoordinateSystem::Projected { epsg: 32617 }, pixel_size: 30.0 },
            ..AnalysisConfig::default()
        }
    }

    /// OLI scene whose left `water_cols` columns are water
    fn oli_scene(id: &str, year: i32, water_cols: usize) -> RasterImage {
        let grid = config().target_grid().unwrap();
        let (rows, cols) = grid.dim();
        let green = Array2::from_elem((rows, cols), 0.3f32);
        let nir = Array2::from_shape_fn((rows, cols), |(_, c)| if c < water_cols { 0.1 } else { 0.5 });
        let mut image = RasterImage::new(id, NaiveDate::from_ymd_opt(year, 6, 1).unwrap(), grid);
        for (name, values) in [
            ("SR_B2", green.clone()),
            ("SR_B3", green),
            ("SR_B4", Array2::from_elem((rows, cols), 0.1)),
            ("SR_B5", nir),
            ("SR_B6", Array2::from_elem((rows, cols), 0.2)),
            ("SR_B7", Array2::from_elem((rows, cols), 0.2)),
            (QA_PIXEL_BAND, Array2::zeros((rows, cols))),
        ] {
            image.insert_band(name, Band::new(values)).unwrap();
        }
        image
    }

    #[test]
    fn test_land_loss_between_epochs() {
        let pipeline = CoastalChangePipeline::new(config()).unwrap();
        let mut per_sensor = BTreeMap::new();
        per_sensor.insert(
            SensorFamily::Landsat8,
            InMemoryCollection::new(vec![oli_scene("old", 1990, 1), oli_scene("new", 2020, 3)]),
        );
        let merged = pipeline.harmonize(per_sensor).unwrap();
        let analysis = pipeline.run(&merged).unwrap();

        // 4x2 grid of 900 m² pixels: land drops from 6 to 2 pixels
        assert_relative_eq!(analysis.before.land_area.square_meters, 6.0 * 900.0);
        assert_relative_eq!(analysis.after.land_area.square_meters, 2.0 * 900.0);
        assert_relative_eq!(analysis.report.area_loss_m2, 4.0 * 900.0);
        assert!(analysis.report.complete);
        assert_relative_eq!(analysis.after.shorelines.total_area_m2(), 6.0 * 900.0);
    }

    #[test]
    fn test_missing_epoch_reports_zero_area() {
        let pipeline = CoastalChangePipeline::new(config()).unwrap();
        let merged = InMemoryCollection::new(Vec::new());
        let analysis = pipeline.run(&merged).unwrap();
        assert!(analysis.before.composite.is_empty());
        assert_eq!(analysis.before.land_area.square_meters, 0.0);
        assert!(!analysis.report.complete);
    }
}
