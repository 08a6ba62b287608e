use crate::core::area::AreaStatistic;
use crate::types::{CoastalError, CoastalResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Land change between two epochs. A negative loss is a land gain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChangeReport {
    pub year_a: i32,
    pub year_b: i32,
    pub area_a_m2: f64,
    pub area_b_m2: f64,
    pub area_loss_m2: f64,
    pub area_loss_km2: f64,
    /// Loss relative to the first epoch, in percent: positive when land was lost,
    /// negative for a gain, `None` when the first area is 0
    pub percent_loss: Option<f64>,
    /// False when either epoch had no valid data, so the loss is not a measurement
    pub complete: bool,
}

impl ChangeReport {
    pub fn from_areas(year_a: i32, area_a_m2: f64, year_b: i32, area_b_m2: f64) -> Self {
        let area_loss_m2 = area_a_m2 - area_b_m2;
        Self {
            year_a,
            year_b,
            area_a_m2,
            area_b_m2,
            area_loss_m2,
            area_loss_km2: area_loss_m2 / 1_000_000.0,
            percent_loss: (area_a_m2 > 0.0).then(|| area_loss_m2 / area_a_m2 * 100.0),
            complete: true,
        }
    }
}

impl fmt::Display for ChangeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Land area {} (m²): {}", self.year_a, self.area_a_m2)?;
        writeln!(f, "Land area {} (m²): {}", self.year_b, self.area_b_m2)?;
        writeln!(f, "Land loss (m²): {}", self.area_loss_m2)?;
        write!(f, "Land loss (km²): {}", self.area_loss_km2)?;
        if !self.complete {
            write!(f, "\n(incomplete: at least one epoch had no valid observations)")?;
        }
        Ok(())
    }
}

/// Derives the change report from two area statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeReporter;

impl ChangeReporter {
    pub fn new() -> Self {
        Self
    }

    /// `before` must be the chronologically first epoch
    pub fn report(&self, before: &AreaStatistic, after: &AreaStatistic) -> CoastalResult<ChangeReport> {
        if before.year >= after.year {
            return Err(CoastalError::Processing(format!(
                "change must run forward in time, got {} -> {}",
                before.year, after.year
            )));
        }
        if before.kind != after.kind {
            return Err(CoastalError::Processing(format!(
                "cannot compare {} area with {} area",
                before.kind, after.kind
            )));
        }

        let mut report =
            ChangeReport::from_areas(before.year, before.square_meters, after.year, after.square_meters);
        report.complete = before.has_data && after.has_data;

        if report.complete {
            log::info!(
                "Land change {} -> {}: {:.1} m² ({:.4} km²)",
                report.year_a,
                report.year_b,
                report.area_loss_m2,
                report.area_loss_km2
            );
        } else {
            log::warn!(
                "Change {} -> {} computed with a missing epoch; loss is not a measurement",
                report.year_a,
                report.year_b
            );
        }
        Ok(report)
    }
}
