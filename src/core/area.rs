use crate::config::{ReductionParams, DEFAULT_AREA_MAX_PIXELS, DEFAULT_SCALE_M};
use crate::core::classify::{Mask, MaskKind};
use crate::core::composite::aoi_mask;
use crate::types::CoastalResult;
use geo::Polygon;
use ndarray::{Array2, Axis, Zip};
use serde::{Deserialize, Serialize};

/// Summed ground area of a mask's member pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AreaStatistic {
    pub year: i32,
    pub kind: MaskKind,
    pub square_meters: f64,
    pub member_pixels: usize,
    /// Pixels with a classification inside the AOI
    pub valid_pixels: usize,
    /// False when the mask had no valid pixel inside the AOI; the area is then 0
    pub has_data: bool,
}

impl AreaStatistic {
    pub fn square_kilometers(&self) -> f64 {
        self.square_meters / 1_000_000.0
    }
}

/// Region reducer summing true pixel areas
#[derive(Debug, Clone, Copy)]
pub struct AreaCalculator {
    params: ReductionParams,
}

impl AreaCalculator {
    pub fn new(params: ReductionParams) -> Self {
        Self { params }
    }

    pub fn standard() -> Self {
        Self::new(ReductionParams {
            scale: DEFAULT_SCALE_M,
            max_pixels: DEFAULT_AREA_MAX_PIXELS,
        })
    }

    /// Area in square meters of every valid member pixel of `mask` inside the AOI
    pub fn area(&self, mask: &Mask, aoi: &Polygon<f64>) -> CoastalResult<AreaStatistic> {
        let reduced = mask.at_scale(self.params.scale);
        let grid = reduced.grid;
        self.params.check("reduce_region", grid.pixel_count())?;

        let inside = aoi_mask(&grid, aoi);
        let valid = Zip::from(&reduced.valid)
            .and(&inside)
            .map_collect(|&v, &i| v && i);
        let members = Zip::from(&reduced.values)
            .and(&valid)
            .map_collect(|&m, &v| m && v);

        let row_areas = grid.row_areas();
        let row_counts = row_member_counts(&members);
        let square_meters: f64 = row_counts
            .iter()
            .zip(&row_areas)
            .map(|(&count, &area)| count as f64 * area)
            .sum();

        let statistic = AreaStatistic {
            year: mask.year,
            kind: mask.kind,
            square_meters,
            member_pixels: row_counts.iter().sum(),
            valid_pixels: valid.iter().filter(|&&v| v).count(),
            has_data: valid.iter().any(|&v| v),
        };

        if statistic.has_data {
            log::info!(
                "{} area {}: {:.1} m² over {} pixels",
                mask.kind,
                mask.year,
                statistic.square_meters,
                statistic.member_pixels
            );
        } else {
            log::warn!("{} mask {} has no valid pixels in the AOI, area is 0", mask.kind, mask.year);
        }
        Ok(statistic)
    }
}

impl Default for AreaCalculator {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(feature = "parallel")]
fn row_member_counts(members: &Array2<bool>) -> Vec<usize> {
    use ndarray::parallel::prelude::*;
    members
        .axis_iter(Axis(0))
        .into_par_iter()
        .map(|row| row.iter().filter(|&&m| m).count())
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn row_member_counts(members: &Array2<bool>) -> Vec<usize> {
    members
        .axis_iter(Axis(0))
        .map(|row| row.iter().filter(|&&m| m).count())
        .collect()
}
