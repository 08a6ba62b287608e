use crate::config::ReflectanceScaling;
use crate::io::collection::ImageCollection;
use crate::types::{
    Band, CanonicalBand, CoastalError, CoastalResult, RasterImage, SensorFamily, QA_PIXEL_BAND,
};
use geo::Polygon;
use ndarray::{Array2, Zip};

/// Bit positions in the quality-flag band that invalidate a pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QaBits {
    pub cloud_shadow: u8,
    pub cloud: u8,
}

impl QaBits {
    /// Collection 2 `QA_PIXEL` layout shared by Landsat 5, 7, 8 and 9
    pub const COLLECTION2: QaBits = QaBits { cloud_shadow: 3, cloud: 5 };

    pub fn for_sensor(sensor: SensorFamily) -> QaBits {
        match sensor {
            SensorFamily::Landsat5
            | SensorFamily::Landsat7
            | SensorFamily::Landsat8
            | SensorFamily::Landsat9 => QaBits::COLLECTION2,
        }
    }

    /// A pixel is clear only if neither the shadow nor the cloud bit is set
    pub fn is_clear(&self, flags: u16) -> bool {
        flags & (1 << self.cloud_shadow) == 0 && flags & (1 << self.cloud) == 0
    }
}

/// Native band identifiers mapped onto the harmonised schema
#[derive(Debug)]
pub struct BandSchema {
    pub name: &'static str,
    pub mapping: [(&'static str, CanonicalBand); 6],
}

/// Landsat 5 TM and Landsat 7 ETM+ surface reflectance bands
pub const TM_ETM_SCHEMA: BandSchema = BandSchema {
    name: "TM/ETM+",
    mapping: [
        ("SR_B1", CanonicalBand::Blue),
        ("SR_B2", CanonicalBand::Green),
        ("SR_B3", CanonicalBand::Red),
        ("SR_B4", CanonicalBand::Nir),
        ("SR_B5", CanonicalBand::Swir1),
        ("SR_B7", CanonicalBand::Swir2),
    ],
};

/// Landsat 8 OLI and Landsat 9 OLI-2 surface reflectance bands
pub const OLI_SCHEMA: BandSchema = BandSchema {
    name: "OLI",
    mapping: [
        ("SR_B2", CanonicalBand::Blue),
        ("SR_B3", CanonicalBand::Green),
        ("SR_B4", CanonicalBand::Red),
        ("SR_B5", CanonicalBand::Nir),
        ("SR_B6", CanonicalBand::Swir1),
        ("SR_B7", CanonicalBand::Swir2),
    ],
};

impl BandSchema {
    pub fn for_sensor(sensor: SensorFamily) -> &'static BandSchema {
        match sensor {
            SensorFamily::Landsat5 | SensorFamily::Landsat7 => &TM_ETM_SCHEMA,
            SensorFamily::Landsat8 | SensorFamily::Landsat9 => &OLI_SCHEMA,
        }
    }
}

/// Scene preprocessing parameters
#[derive(Debug, Clone, Copy, Default)]
pub struct PreprocessParams {
    /// Optional rescaling of digital numbers to reflectance
    pub reflectance_scaling: Option<ReflectanceScaling>,
}

/// Cloud masking and band harmonisation for individual scenes
#[derive(Debug, Clone, Copy)]
pub struct ScenePreprocessor {
    params: PreprocessParams,
}

impl ScenePreprocessor {
    pub fn new(params: PreprocessParams) -> Self {
        Self { params }
    }

    /// Preprocessor that keeps raw digital numbers
    pub fn standard() -> Self {
        Self::new(PreprocessParams::default())
    }

    /// Clear-sky mask from the quality band. Pixels with an invalid QA value are not clear.
    pub fn clear_mask(image: &RasterImage, bits: QaBits) -> CoastalResult<Array2<bool>> {
        let qa = image.require_band(QA_PIXEL_BAND)?;
        let mut mask = Array2::from_elem(qa.dim(), false);
        Zip::from(&mut mask)
            .and(&qa.values)
            .and(&qa.valid)
            .for_each(|m, &flags, &valid| {
                *m = valid && bits.is_clear(flags as u16);
            });
        Ok(mask)
    }

    /// Invalidate cloud and cloud-shadow pixels in every band
    pub fn mask_clouds(&self, mut image: RasterImage, bits: QaBits) -> CoastalResult<RasterImage> {
        let mask = Self::clear_mask(&image, bits)?;
        for band in image.bands.values_mut() {
            band.update_mask(&mask);
        }
        log::debug!(
            "Cloud mask for {}: {} of {} pixels clear",
            image.id,
            mask.iter().filter(|&&m| m).count(),
            mask.len()
        );
        Ok(image)
    }

    /// Select the six schema bands under their canonical names; other bands are dropped
    pub fn rename_bands(&self, image: RasterImage, schema: &BandSchema) -> CoastalResult<RasterImage> {
        for (native, _) in &schema.mapping {
            image.require_band(native)?;
        }

        let RasterImage { id, sensor, acquired, grid, mut bands } = image;
        let mut renamed = RasterImage::new(id, acquired, grid);
        renamed.sensor = sensor;

        for (native, canonical) in &schema.mapping {
            let mut band = bands.remove(*native).ok_or_else(|| CoastalError::MissingBand {
                image_id: renamed.id.clone(),
                band: native.to_string(),
            })?;
            if let Some(scaling) = self.params.reflectance_scaling {
                band.values.mapv_inplace(|dn| dn * scaling.multiply + scaling.add);
            }
            renamed.insert_band(canonical.name(), band)?;
        }
        Ok(renamed)
    }

    /// Mask clouds and harmonise bands for one scene of `sensor`
    pub fn harmonize(&self, image: RasterImage, sensor: SensorFamily) -> CoastalResult<RasterImage> {
        let mut masked = self.mask_clouds(image, QaBits::for_sensor(sensor))?;
        masked.sensor = Some(sensor);
        self.rename_bands(masked, BandSchema::for_sensor(sensor))
    }

    /// Like [`harmonize`](Self::harmonize), but a scene missing a band is dropped instead of failing
    pub fn harmonize_or_skip(
        &self,
        image: RasterImage,
        sensor: SensorFamily,
    ) -> CoastalResult<Option<RasterImage>> {
        match self.harmonize(image, sensor) {
            Ok(harmonized) => Ok(Some(harmonized)),
            Err(CoastalError::MissingBand { image_id, band }) => {
                log::warn!("Excluding {} from {} collection: missing band {}", image_id, sensor, band);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Spatially filter a raw per-sensor collection and queue harmonisation of each scene
    pub fn preprocess_collection<C: ImageCollection>(
        &self,
        collection: C,
        sensor: SensorFamily,
        aoi: &Polygon<f64>,
    ) -> C {
        let preprocessor = *self;
        let filtered = collection.filter_bounds(aoi);
        log::info!(
            "{} ({}): {} scenes intersect the AOI",
            sensor,
            sensor.collection_id(),
            filtered.len()
        );
        filtered.map_images(move |image| preprocessor.harmonize_or_skip(image, sensor))
    }
}

impl Default for ScenePreprocessor {
    fn default() -> Self {
        Self::standard()
    }
}

/// Harmonised band of an image, by canonical name
pub fn canonical_band(image: &RasterImage, band: CanonicalBand) -> CoastalResult<&Band> {
    image.require_band(band.name())
}
