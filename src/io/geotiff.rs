use crate::io::collection::{SceneLoader, SceneRef};
use crate::types::{Band, CoastalError, CoastalResult, CoordinateSystem, GeoTransform, GridSpec, RasterImage};
use gdal::Dataset;
use ndarray::Array2;
use std::path::Path;

/// Loads Landsat band GeoTIFFs through GDAL.
///
/// Band files must already be in the analysis CRS; no reprojection happens here.
pub struct GdalSceneLoader {
    crs: CoordinateSystem,
}

impl GdalSceneLoader {
    pub fn new(crs: CoordinateSystem) -> Self {
        Self { crs }
    }

    /// Read band 1 of a GeoTIFF, marking the no-data value invalid
    pub fn read_band<P: AsRef<Path>>(path: P) -> CoastalResult<(Band, GeoTransform, (usize, usize))> {
        log::debug!("Reading band file: {}", path.as_ref().display());

        let dataset = Dataset::open(path.as_ref())?;
        let geo_transform = dataset.geo_transform()?;
        let (width, height) = dataset.raster_size();

        let rasterband = dataset.rasterband(1)?;
        let nodata = rasterband.no_data_value().map(|v| v as f32);
        let band_data = rasterband.read_as::<f32>((0, 0), (width, height), (width, height), None)?;

        let values = Array2::from_shape_vec((height, width), band_data.data)
            .map_err(|e| CoastalError::Processing(format!("Failed to reshape band data: {}", e)))?;
        let valid = values.mapv(|v| v.is_finite() && Some(v) != nodata);

        let transform = GeoTransform {
            top_left_x: geo_transform[0],
            pixel_width: geo_transform[1],
            rotation_x: geo_transform[2],
            top_left_y: geo_transform[3],
            rotation_y: geo_transform[4],
            pixel_height: geo_transform[5],
        };

        Ok((Band::with_validity(values, valid)?, transform, (height, width)))
    }
}

impl SceneLoader for GdalSceneLoader {
    fn load(&self, scene: &SceneRef) -> CoastalResult<RasterImage> {
        log::info!("Loading scene {} ({} bands)", scene.id, scene.band_files.len());

        let mut image: Option<RasterImage> = None;
        for (name, path) in &scene.band_files {
            let (band, transform, (rows, cols)) = Self::read_band(path)?;
            let grid = GridSpec { rows, cols, transform, crs: self.crs };

            let target = image.get_or_insert_with(|| {
                let mut img = RasterImage::new(scene.id.clone(), scene.acquired, grid);
                img.sensor = scene.sensor;
                img
            });
            if !target.grid.same_as(&grid) {
                return Err(CoastalError::GridMismatch(format!(
                    "band {} of scene {} is not on the scene grid",
                    name, scene.id
                )));
            }
            target.insert_band(name.clone(), band)?;
        }

        image.ok_or_else(|| CoastalError::Metadata(format!("Scene {} lists no band files", scene.id)))
    }
}
