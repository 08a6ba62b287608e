use crate::config::DEFAULT_WATER_THRESHOLD;
use crate::core::composite::Composite;
use crate::types::{Band, CoastalResult, GridSpec, NDWI_BAND};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

/// Class represented by a mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaskKind {
    Water,
    Land,
}

impl std::fmt::Display for MaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MaskKind::Water => write!(f, "water"),
            MaskKind::Land => write!(f, "land"),
        }
    }
}

/// Binary class membership with a validity channel
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    pub year: i32,
    pub kind: MaskKind,
    /// Membership; only meaningful where `valid`
    pub values: Array2<bool>,
    pub valid: Array2<bool>,
    pub grid: GridSpec,
}

impl Mask {
    /// `Some(true)` for a member pixel, `Some(false)` for a valid non-member, `None` if invalid
    pub fn get(&self, row: usize, col: usize) -> Option<bool> {
        match self.valid.get((row, col)) {
            Some(true) => self.values.get((row, col)).copied(),
            _ => None,
        }
    }

    /// Whether any pixel carries a classification
    pub fn has_data(&self) -> bool {
        self.valid.iter().any(|&v| v)
    }

    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|&&v| v).count()
    }

    /// Pixels that are valid members of the class
    pub fn member_count(&self) -> usize {
        Zip::from(&self.values)
            .and(&self.valid)
            .fold(0, |acc, &m, &v| acc + usize::from(m && v))
    }

    /// Keep only member pixels valid, so zeros drop out of later reductions
    pub fn self_mask(&self) -> Mask {
        let valid = Zip::from(&self.values)
            .and(&self.valid)
            .map_collect(|&m, &v| m && v);
        Mask { valid, ..self.clone() }
    }

    /// Nearest-neighbour view of the mask at `scale_m` meters.
    ///
    /// Each coarse pixel takes the value of the fine pixel at its block centre.
    /// Scales at or below the native resolution return the mask unchanged.
    pub fn at_scale(&self, scale_m: f64) -> Mask {
        let factor = self.grid.reduction_factor(scale_m);
        if factor <= 1 {
            return self.clone();
        }

        let grid = self.grid.coarsened(factor);
        let sample = |coarse: usize, len: usize| (coarse * factor + factor / 2).min(len - 1);
        let values = Array2::from_shape_fn(grid.dim(), |(r, c)| {
            self.values[[sample(r, self.grid.rows), sample(c, self.grid.cols)]]
        });
        let valid = Array2::from_shape_fn(grid.dim(), |(r, c)| {
            self.valid[[sample(r, self.grid.rows), sample(c, self.grid.cols)]]
        });
        log::debug!(
            "Resampled {} mask {} by factor {} to {}x{}",
            self.kind,
            self.year,
            factor,
            grid.rows,
            grid.cols
        );
        Mask { year: self.year, kind: self.kind, values, valid, grid }
    }
}

/// Classification parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassifierParams {
    /// NDWI strictly above this is water, at or below is land
    pub threshold: f32,
}

impl Default for ClassifierParams {
    fn default() -> Self {
        Self { threshold: DEFAULT_WATER_THRESHOLD }
    }
}

/// Water/land classification of indexed composites
#[derive(Debug, Clone, Copy)]
pub struct Classifier {
    params: ClassifierParams,
}

impl Classifier {
    pub fn new(params: ClassifierParams) -> Self {
        Self { params }
    }

    /// Classifier with the fixed NDWI > 0 rule
    pub fn standard() -> Self {
        Self::new(ClassifierParams::default())
    }

    pub fn threshold(&self) -> f32 {
        self.params.threshold
    }

    /// Membership of `kind` for every valid pixel of an NDWI band
    pub fn classify_band(&self, ndwi: &Band, kind: MaskKind) -> (Array2<bool>, Array2<bool>) {
        let threshold = self.params.threshold;
        let values = ndwi.values.mapv(|v| match kind {
            MaskKind::Water => v > threshold,
            MaskKind::Land => v <= threshold,
        });
        (values, ndwi.valid.clone())
    }

    pub fn mask(&self, composite: &Composite, kind: MaskKind) -> CoastalResult<Mask> {
        let ndwi = composite.image.require_band(NDWI_BAND)?;
        let (values, valid) = self.classify_band(ndwi, kind);
        let mask = Mask {
            year: composite.year,
            kind,
            values,
            valid,
            grid: composite.image.grid,
        };
        if mask.has_data() {
            log::info!(
                "{} mask {}: {} of {} valid pixels",
                kind,
                composite.year,
                mask.member_count(),
                mask.valid_count()
            );
        } else {
            log::warn!("{} mask {} has no valid pixels", kind, composite.year);
        }
        Ok(mask)
    }

    pub fn water_mask(&self, composite: &Composite) -> CoastalResult<Mask> {
        self.mask(composite, MaskKind::Water)
    }

    pub fn land_mask(&self, composite: &Composite) -> CoastalResult<Mask> {
        self.mask(composite, MaskKind::Land)
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::composite::CompositeStatus;
    use crate::types::{BoundingBox, CoordinateSystem, RasterImage};
    use chrono::NaiveDate;

    fn composite_with_ndwi(values: Vec<f32>, valid: Vec<bool>) -> Composite {
        let grid = GridSpec::covering(
            &BoundingBox { min_lon: 0.0, max_lon: 60.0, min_lat: 0.0, max_lat: 60.0 },
            30.0,
            CoordinateSystem::Projected { epsg: 32617 },
        );
        let ndwi = Band::with_validity(
            Array2::from_shape_vec((2, 2), values).unwrap(),
            Array2::from_shape_vec((2, 2), valid).unwrap(),
        )
        .unwrap();
        let image = RasterImage::new("c", NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(), grid)
            .with_band(NDWI_BAND, ndwi)
            .unwrap();
        Composite {
            year: 2020,
            image,
            observation_count: Array2::zeros((2, 2)),
            source_count: 1,
            status: CompositeStatus::Valid,
        }
    }

    #[test]
    fn test_threshold_boundaries() {
        let composite = composite_with_ndwi(vec![-0.2, 0.0, 0.5, 0.3], vec![true, true, true, false]);
        let classifier = Classifier::standard();
        let water = classifier.water_mask(&composite).unwrap();
        let land = classifier.land_mask(&composite).unwrap();

        assert_eq!(water.get(0, 0), Some(false));
        assert_eq!(land.get(0, 0), Some(true));
        // NDWI exactly at the threshold is land
        assert_eq!(land.get(0, 1), Some(true));
        assert_eq!(water.get(1, 0), Some(true));
        assert_eq!(water.get(1, 1), None);
        assert_eq!(land.get(1, 1), None);
    }

    #[test]
    fn test_masks_are_complementary() {
        let composite = composite_with_ndwi(vec![-0.9, 0.1, 0.0, 0.7], vec![true; 4]);
        let classifier = Classifier::standard();
        let water = classifier.water_mask(&composite).unwrap();
        let land = classifier.land_mask(&composite).unwrap();
        for row in 0..2 {
            for col in 0..2 {
                assert_ne!(water.get(row, col), land.get(row, col));
            }
        }
        assert_eq!(water.member_count() + land.member_count(), 4);
    }

    #[test]
    fn test_self_mask_keeps_members_only() {
        let composite = composite_with_ndwi(vec![0.4, -0.4, 0.4, -0.4], vec![true; 4]);
        let water = Classifier::standard().water_mask(&composite).unwrap().self_mask();
        assert_eq!(water.valid_count(), 2);
        assert_eq!(water.get(0, 1), None);
    }

    #[test]
    fn test_custom_threshold() {
        let composite = composite_with_ndwi(vec![0.05, 0.15, -1.0, 1.0], vec![true; 4]);
        let classifier = Classifier::new(ClassifierParams { threshold: 0.1 });
        let water = classifier.water_mask(&composite).unwrap();
        assert_eq!(water.member_count(), 2);
    }

    #[test]
    fn test_at_scale_samples_block_centres() {
        // 2x2 at 30 m viewed at 60 m: one pixel sampled from (1, 1)
        let composite = composite_with_ndwi(vec![-0.5, -0.5, -0.5, 0.5], vec![true; 4]);
        let water = Classifier::standard().water_mask(&composite).unwrap();
        let coarse = water.at_scale(60.0);
        assert_eq!(coarse.grid.dim(), (1, 1));
        assert_eq!(coarse.get(0, 0), Some(true));
        assert_eq!(water.at_scale(30.0), water);
    }

    #[test]
    fn test_fully_invalid_mask_has_no_data() {
        let composite = composite_with_ndwi(vec![0.0; 4], vec![false; 4]);
        let land = Classifier::standard().land_mask(&composite).unwrap();
        assert!(!land.has_data());
        assert_eq!(land.member_count(), 0);
    }
}
