use approx::assert_relative_eq;
use chrono::NaiveDate;
use coastwatch::config::{AnalysisConfig, Epochs, GridConfig};
use coastwatch::core::{
    index_composite, normalized_difference, AreaCalculator, BandSchema, ChangeReport, Classifier,
    CoastalChangePipeline,
};
use coastwatch::types::{
    Band, CanonicalBand, CoordinateSystem, RasterImage, SensorFamily, QA_PIXEL_BAND,
};
use coastwatch::InMemoryCollection;
use ndarray::Array2;
use std::collections::BTreeMap;

const SHADOW: u16 = 1 << 3;
const CLOUD: u16 = 1 << 5;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 6 x 4 pixels of 30 m in UTM 17N
fn config() -> AnalysisConfig {
    AnalysisConfig {
        aoi: vec![[0.0, 0.0], [180.0, 0.0], [180.0, 120.0], [0.0, 120.0]],
        epochs: Epochs { before: 1990, after: 2020 },
        grid: GridConfig { crs: CoordinateSystem::Projected { epsg: 32617 }, pixel_size: 30.0 },
        ..AnalysisConfig::default()
    }
}

/// Raw scene in the sensor's native band layout; the `water_cols` leftmost columns are water
fn raw_scene<F>(sensor: SensorFamily, id: &str, date: (i32, u32, u32), water_cols: usize, qa: F) -> RasterImage
where
    F: Fn(usize, usize) -> u16,
{
    let grid = config().target_grid().unwrap();
    let dim = grid.dim();
    let mut image = RasterImage::new(id, NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(), grid)
        .with_sensor(sensor);

    for (native, canonical) in &BandSchema::for_sensor(sensor).mapping {
        let values = match canonical {
            CanonicalBand::Green => Array2::from_elem(dim, 0.3f32),
            CanonicalBand::Red => Array2::from_elem(dim, 0.1),
            CanonicalBand::Nir => Array2::from_shape_fn(dim, |(_, c)| if c < water_cols { 0.1 } else { 0.5 }),
            _ => Array2::from_elem(dim, 0.2),
        };
        image.insert_band(*native, Band::new(values)).unwrap();
    }
    let flags = Array2::from_shape_fn(dim, |(r, c)| qa(r, c) as f32);
    image.insert_band(QA_PIXEL_BAND, Band::new(flags)).unwrap();
    image
}

fn clear(_: usize, _: usize) -> u16 {
    0
}

fn per_sensor(images: Vec<RasterImage>) -> BTreeMap<SensorFamily, InMemoryCollection> {
    let mut grouped: BTreeMap<SensorFamily, Vec<RasterImage>> = BTreeMap::new();
    for image in images {
        let sensor = image.sensor.expect("test scenes carry a sensor");
        grouped.entry(sensor).or_default().push(image);
    }
    grouped
        .into_iter()
        .map(|(sensor, images)| (sensor, InMemoryCollection::new(images)))
        .collect()
}

fn reference_scenes() -> Vec<RasterImage> {
    let mut incomplete = raw_scene(SensorFamily::Landsat5, "LT05_incomplete", (1990, 8, 1), 6, clear);
    incomplete.bands.remove("SR_B4");

    vec![
        raw_scene(SensorFamily::Landsat5, "LT05_a", (1990, 3, 15), 1, clear),
        raw_scene(SensorFamily::Landsat5, "LT05_b", (1990, 11, 2), 1, clear),
        incomplete,
        raw_scene(SensorFamily::Landsat8, "LC08_a", (2020, 1, 3), 4, clear),
        // All land, but the four western columns are flagged: cloud in 0-1, shadow in 2-3
        raw_scene(SensorFamily::Landsat7, "LE07_cloudy", (2020, 6, 1), 0, |_, c| match c {
            0 | 1 => CLOUD,
            2 | 3 => SHADOW,
            _ => 0,
        }),
        raw_scene(SensorFamily::Landsat9, "LC09_next_year", (2021, 1, 1), 6, clear),
    ]
}

#[test]
fn test_multi_sensor_land_loss() {
    init_logging();

    let pipeline = CoastalChangePipeline::new(config()).expect("valid configuration");
    let merged = pipeline.harmonize(per_sensor(reference_scenes())).expect("harmonize");
    let analysis = pipeline.run(&merged).expect("analysis");

    println!("{}", analysis.report);

    assert_eq!(analysis.before.composite.source_count, 2);
    assert_eq!(analysis.after.composite.source_count, 2);

    // Unmasked clouds would pull the western columns to NDWI = 0 (land)
    assert_eq!(analysis.after.water_mask.member_count(), 16);
    assert_eq!(analysis.before.water_mask.member_count(), 4);

    assert_relative_eq!(analysis.before.land_area.square_meters, 20.0 * 900.0);
    assert_relative_eq!(analysis.after.land_area.square_meters, 8.0 * 900.0);
    assert_relative_eq!(analysis.report.area_loss_m2, 12.0 * 900.0);
    assert_relative_eq!(analysis.report.area_loss_km2, 0.0108, epsilon = 1e-12);
    assert!(analysis.report.complete);
}

#[test]
fn test_masks_partition_valid_area() {
    init_logging();

    let pipeline = CoastalChangePipeline::new(config()).unwrap();
    let merged = pipeline.harmonize(per_sensor(reference_scenes())).unwrap();
    let analysis = pipeline.run(&merged).unwrap();
    let calculator = AreaCalculator::standard();

    for epoch in [&analysis.before, &analysis.after] {
        let water = &epoch.water_mask;
        let land = &epoch.land_mask;
        for row in 0..water.grid.rows {
            for col in 0..water.grid.cols {
                match (water.get(row, col), land.get(row, col)) {
                    (Some(w), Some(l)) => assert_ne!(w, l),
                    (None, None) => {}
                    other => panic!("validity differs at ({}, {}): {:?}", row, col, other),
                }
            }
        }

        let water_area = calculator.area(water, pipeline.aoi()).unwrap();
        let valid_area = water_area.valid_pixels as f64 * 900.0;
        assert_relative_eq!(water_area.square_meters + epoch.land_area.square_meters, valid_area);
    }
}

#[test]
fn test_reindexing_is_idempotent() {
    let pipeline = CoastalChangePipeline::new(config()).unwrap();
    let merged = pipeline.harmonize(per_sensor(reference_scenes())).unwrap();
    let epoch = pipeline.run_epoch(&merged, 2020).unwrap();

    let again = index_composite(epoch.composite.clone()).unwrap();
    let classifier = Classifier::standard();
    assert_eq!(classifier.water_mask(&again).unwrap(), epoch.water_mask);
    assert_eq!(classifier.land_mask(&again).unwrap(), epoch.land_mask);
}

#[test]
fn test_shoreline_area_matches_water_pixels() {
    let pipeline = CoastalChangePipeline::new(config()).unwrap();
    let merged = pipeline.harmonize(per_sensor(reference_scenes())).unwrap();
    let analysis = pipeline.run(&merged).unwrap();

    for epoch in [&analysis.before, &analysis.after] {
        let expected = epoch.water_mask.member_count() as f64 * 900.0;
        assert_relative_eq!(epoch.shorelines.total_area_m2(), expected, epsilon = 900.0);
        assert!(epoch.shorelines.features.iter().all(|f| f.year == epoch.year));
    }
    // The western water strip is a single region
    assert_eq!(analysis.after.shorelines.len(), 1);
}

#[test]
fn test_year_without_scenes() {
    init_logging();

    let config = AnalysisConfig { epochs: Epochs { before: 2000, after: 2020 }, ..config() };
    let pipeline = CoastalChangePipeline::new(config).unwrap();
    let merged = pipeline.harmonize(per_sensor(reference_scenes())).unwrap();
    let analysis = pipeline.run(&merged).expect("an empty epoch is not an error");

    assert!(analysis.before.composite.is_empty());
    assert!(!analysis.before.land_mask.has_data());
    assert!(analysis.before.shorelines.is_empty());
    assert_eq!(analysis.before.land_area.square_meters, 0.0);
    assert!(!analysis.before.land_area.has_data);

    assert_relative_eq!(analysis.report.area_loss_m2, -8.0 * 900.0);
    assert_eq!(analysis.report.percent_loss, None);
    assert!(!analysis.report.complete);
}

#[test]
fn test_reference_scenarios() {
    let pixel = |v: f32| Band::new(Array2::from_elem((1, 1), v));

    let ndvi = normalized_difference(&pixel(0.5), &pixel(0.1));
    assert_relative_eq!(ndvi.get(0, 0).unwrap(), 0.667, epsilon = 1e-3);

    let land_ndwi = normalized_difference(&pixel(0.2), &pixel(0.3));
    assert_relative_eq!(land_ndwi.get(0, 0).unwrap(), -0.2, epsilon = 1e-6);
    assert!(land_ndwi.get(0, 0).unwrap() <= 0.0);

    let water_ndwi = normalized_difference(&pixel(0.3), &pixel(0.1));
    assert_relative_eq!(water_ndwi.get(0, 0).unwrap(), 0.5, epsilon = 1e-6);

    let report = ChangeReport::from_areas(1990, 1_000_000.0, 2020, 700_000.0);
    assert_relative_eq!(report.area_loss_m2, 300_000.0);
    assert_relative_eq!(report.area_loss_km2, 0.3);
}
