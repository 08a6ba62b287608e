use crate::core::preprocess::ScenePreprocessor;
use crate::io::collection::ImageCollection;
use crate::types::{CoastalError, CoastalResult, SensorFamily};
use geo::Polygon;
use std::collections::BTreeMap;

/// Union harmonised collections into one series.
///
/// Every member image is kept; overlapping sensors add samples to the median.
pub fn merge_collections<C, I>(collections: I) -> CoastalResult<C>
where
    C: ImageCollection,
    I: IntoIterator<Item = C>,
{
    let mut iter = collections.into_iter();
    let first = iter
        .next()
        .ok_or_else(|| CoastalError::Processing("No collections to merge".to_string()))?;
    let merged = iter.fold(first, |acc, next| acc.merge(next));
    log::info!("Merged collection holds {} scenes", merged.len());
    Ok(merged)
}

/// Preprocess each per-sensor collection and merge them, in sensor order
pub fn harmonized_series<C: ImageCollection>(
    per_sensor: BTreeMap<SensorFamily, C>,
    preprocessor: &ScenePreprocessor,
    aoi: &Polygon<f64>,
) -> CoastalResult<C> {
    merge_collections(
        per_sensor
            .into_iter()
            .map(|(sensor, raw)| preprocessor.preprocess_collection(raw, sensor, aoi)),
    )
}
