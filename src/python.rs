//! Python bindings (`coastwatch._core`)
//!
//! Arrays cross the boundary as 2-D float32 with NaN for invalid pixels.

use crate::config::DEFAULT_WATER_THRESHOLD;
use crate::core::change::ChangeReport;
use crate::core::classify::{Classifier, ClassifierParams, MaskKind};
use crate::core::indices;
use crate::types::{ellipsoidal_cell_area, Band, CoastalError};
use ndarray::{Array2, Zip};
use numpy::{IntoPyArray, PyArray2, PyReadonlyArray2};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;

impl From<CoastalError> for PyErr {
    fn from(err: CoastalError) -> PyErr {
        match err {
            CoastalError::Config(_) | CoastalError::GridMismatch(_) => PyValueError::new_err(err.to_string()),
            _ => PyRuntimeError::new_err(err.to_string()),
        }
    }
}

fn band_from_array(array: &PyReadonlyArray2<f32>) -> Band {
    Band::new(array.as_array().to_owned())
}

fn to_nan_array(values: &Array2<f32>, valid: &Array2<bool>) -> Array2<f32> {
    Zip::from(values)
        .and(valid)
        .map_collect(|&v, &ok| if ok { v } else { f32::NAN })
}

/// (a - b) / (a + b); NaN where an input is NaN or the denominator is zero
#[pyfunction]
fn normalized_difference<'py>(
    py: Python<'py>,
    a: PyReadonlyArray2<f32>,
    b: PyReadonlyArray2<f32>,
) -> PyResult<&'py PyArray2<f32>> {
    if a.shape() != b.shape() {
        return Err(PyValueError::new_err(format!(
            "Shape mismatch: {:?} vs {:?}",
            a.shape(),
            b.shape()
        )));
    }
    let band = indices::normalized_difference(&band_from_array(&a), &band_from_array(&b));
    Ok(to_nan_array(&band.values, &band.valid).into_pyarray(py))
}

/// 1.0 where NDWI > threshold, 0.0 elsewhere, NaN where NDWI is NaN
#[pyfunction]
#[pyo3(signature = (ndwi, threshold = DEFAULT_WATER_THRESHOLD))]
fn classify_water<'py>(
    py: Python<'py>,
    ndwi: PyReadonlyArray2<f32>,
    threshold: f32,
) -> PyResult<&'py PyArray2<f32>> {
    if !threshold.is_finite() {
        return Err(PyValueError::new_err("threshold must be finite"));
    }
    let classifier = Classifier::new(ClassifierParams { threshold });
    let (members, valid) = classifier.classify_band(&band_from_array(&ndwi), MaskKind::Water);
    let values = members.mapv(|m| if m { 1.0 } else { 0.0 });
    Ok(to_nan_array(&values, &valid).into_pyarray(py))
}

/// Change report for two land areas in square meters
#[pyfunction]
#[pyo3(signature = (area_a, area_b, year_a = 1990, year_b = 2020))]
fn land_change(py: Python<'_>, area_a: f64, area_b: f64, year_a: i32, year_b: i32) -> PyResult<&PyDict> {
    if year_a >= year_b {
        return Err(PyValueError::new_err("year_a must precede year_b"));
    }
    let report = ChangeReport::from_areas(year_a, area_a, year_b, area_b);
    let dict = PyDict::new(py);
    dict.set_item("year_a", report.year_a)?;
    dict.set_item("year_b", report.year_b)?;
    dict.set_item("area_a_m2", report.area_a_m2)?;
    dict.set_item("area_b_m2", report.area_b_m2)?;
    dict.set_item("area_loss_m2", report.area_loss_m2)?;
    dict.set_item("area_loss_km2", report.area_loss_km2)?;
    dict.set_item("percent_loss", report.percent_loss)?;
    Ok(dict)
}

/// Ground area in m² of a lat/lon cell on the WGS84 ellipsoid
#[pyfunction]
fn cell_area(lat_a: f64, lat_b: f64, delta_lon: f64) -> f64 {
    ellipsoidal_cell_area(lat_a, lat_b, delta_lon)
}

/// Python module definition
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(normalized_difference, m)?)?;
    m.add_function(wrap_pyfunction!(classify_water, m)?)?;
    m.add_function(wrap_pyfunction!(land_change, m)?)?;
    m.add_function(wrap_pyfunction!(cell_area, m)?)?;
    m.add("DEFAULT_WATER_THRESHOLD", DEFAULT_WATER_THRESHOLD)?;
    Ok(())
}
