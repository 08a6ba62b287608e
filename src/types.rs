use chrono::NaiveDate;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name of the per-pixel quality bitfield band in Landsat Collection 2 products
pub const QA_PIXEL_BAND: &str = "QA_PIXEL";

/// Name of the vegetation index band appended by the index calculator
pub const NDVI_BAND: &str = "NDVI";

/// Name of the water index band appended by the index calculator
pub const NDWI_BAND: &str = "NDWI";

/// WGS84 semi-major axis (meters)
pub const WGS84_A: f64 = 6_378_137.0;

/// WGS84 flattening
pub const WGS84_F: f64 = 1.0 / 298.257_223_563;

/// Approximate length of one degree of latitude (meters)
pub const METERS_PER_DEGREE: f64 = 111_320.0;

/// Harmonised band schema shared by every sensor after preprocessing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CanonicalBand {
    Blue,
    Green,
    Red,
    Nir,
    Swir1,
    Swir2,
}

impl CanonicalBand {
    pub const ALL: [CanonicalBand; 6] = [
        CanonicalBand::Blue,
        CanonicalBand::Green,
        CanonicalBand::Red,
        CanonicalBand::Nir,
        CanonicalBand::Swir1,
        CanonicalBand::Swir2,
    ];

    /// Band name as stored in a harmonised image
    pub fn name(&self) -> &'static str {
        match self {
            CanonicalBand::Blue => "Blue",
            CanonicalBand::Green => "Green",
            CanonicalBand::Red => "Red",
            CanonicalBand::Nir => "NIR",
            CanonicalBand::Swir1 => "SWIR1",
            CanonicalBand::Swir2 => "SWIR2",
        }
    }
}

impl std::fmt::Display for CanonicalBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Landsat missions supported by the analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SensorFamily {
    /// Landsat 5 Thematic Mapper
    Landsat5,
    /// Landsat 7 Enhanced Thematic Mapper Plus
    Landsat7,
    /// Landsat 8 Operational Land Imager
    Landsat8,
    /// Landsat 9 Operational Land Imager 2
    Landsat9,
}

impl SensorFamily {
    pub const ALL: [SensorFamily; 4] = [
        SensorFamily::Landsat5,
        SensorFamily::Landsat7,
        SensorFamily::Landsat8,
        SensorFamily::Landsat9,
    ];

    /// Collection 2 Tier 1 Level-2 collection identifier
    pub fn collection_id(&self) -> &'static str {
        match self {
            SensorFamily::Landsat5 => "LANDSAT/LT05/C02/T1_L2",
            SensorFamily::Landsat7 => "LANDSAT/LE07/C02/T1_L2",
            SensorFamily::Landsat8 => "LANDSAT/LC08/C02/T1_L2",
            SensorFamily::Landsat9 => "LANDSAT/LC09/C02/T1_L2",
        }
    }

    pub fn mission_number(&self) -> u8 {
        match self {
            SensorFamily::Landsat5 => 5,
            SensorFamily::Landsat7 => 7,
            SensorFamily::Landsat8 => 8,
            SensorFamily::Landsat9 => 9,
        }
    }

    pub fn from_mission_number(number: u8) -> Option<Self> {
        SensorFamily::ALL
            .iter()
            .copied()
            .find(|s| s.mission_number() == number)
    }

    /// Parse an MTL `SPACECRAFT_ID` value such as `LANDSAT_8`
    pub fn from_spacecraft_id(id: &str) -> Option<Self> {
        id.trim()
            .strip_prefix("LANDSAT_")
            .and_then(|n| n.parse::<u8>().ok())
            .and_then(Self::from_mission_number)
    }
}

impl std::fmt::Display for SensorFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Landsat {}", self.mission_number())
    }
}

/// Coordinate system enumeration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CoordinateSystem {
    /// Geographic coordinates (longitude, latitude in degrees)
    Geographic,
    /// Projected coordinates in meters (e.g., UTM)
    Projected { epsg: u32 },
}

/// Geospatial bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_lon <= other.max_lon
            && other.min_lon <= self.max_lon
            && self.min_lat <= other.max_lat
            && other.min_lat <= self.max_lat
    }

    /// Smallest box enclosing every point; `None` for an empty iterator
    pub fn from_points<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        points.into_iter().fold(None, |acc, (x, y)| {
            Some(match acc {
                None => BoundingBox { min_lon: x, max_lon: x, min_lat: y, max_lat: y },
                Some(b) => BoundingBox {
                    min_lon: b.min_lon.min(x),
                    max_lon: b.max_lon.max(x),
                    min_lat: b.min_lat.min(y),
                    max_lat: b.max_lat.max(y),
                },
            })
        })
    }
}

/// Geospatial transformation parameters (GDAL ordering)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// Map coordinates of a (possibly fractional) pixel position
    pub fn pixel_to_map(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.top_left_x + col * self.pixel_width + row * self.rotation_x,
            self.top_left_y + col * self.rotation_y + row * self.pixel_height,
        )
    }

    /// Fractional pixel position of a map coordinate. Rotation terms are ignored.
    pub fn map_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.top_left_x) / self.pixel_width,
            (y - self.top_left_y) / self.pixel_height,
        )
    }

    pub fn is_north_up(&self) -> bool {
        self.rotation_x == 0.0 && self.rotation_y == 0.0
    }
}

/// Pixel grid shared by every band of a raster image
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub rows: usize,
    pub cols: usize,
    pub transform: GeoTransform,
    pub crs: CoordinateSystem,
}

impl GridSpec {
    /// North-up grid of square pixels covering `bbox`
    pub fn covering(bbox: &BoundingBox, pixel_size: f64, crs: CoordinateSystem) -> Self {
        let cols = ((bbox.max_lon - bbox.min_lon) / pixel_size).ceil().max(1.0) as usize;
        let rows = ((bbox.max_lat - bbox.min_lat) / pixel_size).ceil().max(1.0) as usize;
        Self {
            rows,
            cols,
            transform: GeoTransform {
                top_left_x: bbox.min_lon,
                pixel_width: pixel_size,
                rotation_x: 0.0,
                top_left_y: bbox.max_lat,
                rotation_y: 0.0,
                pixel_height: -pixel_size,
            },
            crs,
        }
    }

    pub fn dim(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn pixel_count(&self) -> u64 {
        self.rows as u64 * self.cols as u64
    }

    /// Map coordinates of the centre of pixel (row, col)
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        self.transform.pixel_to_map(col as f64 + 0.5, row as f64 + 0.5)
    }

    pub fn bounds(&self) -> BoundingBox {
        let corners = [
            self.transform.pixel_to_map(0.0, 0.0),
            self.transform.pixel_to_map(self.cols as f64, 0.0),
            self.transform.pixel_to_map(0.0, self.rows as f64),
            self.transform.pixel_to_map(self.cols as f64, self.rows as f64),
        ];
        // Four corners always yield a box
        BoundingBox::from_points(corners).unwrap_or(BoundingBox {
            min_lon: 0.0,
            max_lon: 0.0,
            min_lat: 0.0,
            max_lat: 0.0,
        })
    }

    /// Approximate ground size of one pixel in meters
    pub fn native_scale_m(&self) -> f64 {
        match self.crs {
            CoordinateSystem::Geographic => self.transform.pixel_height.abs() * METERS_PER_DEGREE,
            CoordinateSystem::Projected { .. } => self.transform.pixel_width.abs(),
        }
    }

    /// True ground area of one pixel of the given row, in square meters
    pub fn pixel_area_m2(&self, row: usize) -> f64 {
        match self.crs {
            CoordinateSystem::Projected { .. } => {
                (self.transform.pixel_width * self.transform.pixel_height).abs()
            }
            CoordinateSystem::Geographic => {
                let (_, lat_top) = self.transform.pixel_to_map(0.0, row as f64);
                let (_, lat_bottom) = self.transform.pixel_to_map(0.0, row as f64 + 1.0);
                ellipsoidal_cell_area(lat_top, lat_bottom, self.transform.pixel_width.abs())
            }
        }
    }

    /// Pixel areas for every row of the grid
    pub fn row_areas(&self) -> Vec<f64> {
        (0..self.rows).map(|row| self.pixel_area_m2(row)).collect()
    }

    /// Integer block factor for reducing this grid at `scale_m` meters (at least 1)
    pub fn reduction_factor(&self, scale_m: f64) -> usize {
        let native = self.native_scale_m();
        if native <= 0.0 || !scale_m.is_finite() {
            return 1;
        }
        (scale_m / native).round().max(1.0) as usize
    }

    /// Grid with pixels `factor` times larger, anchored at the same origin
    pub fn coarsened(&self, factor: usize) -> GridSpec {
        let f = factor.max(1);
        let mut transform = self.transform;
        transform.pixel_width *= f as f64;
        transform.pixel_height *= f as f64;
        transform.rotation_x *= f as f64;
        transform.rotation_y *= f as f64;
        GridSpec {
            rows: (self.rows + f - 1) / f,
            cols: (self.cols + f - 1) / f,
            transform,
            crs: self.crs,
        }
    }

    /// Sub-grid of `rows` full-width rows starting at `start_row`
    pub fn row_window(&self, start_row: usize, rows: usize) -> GridSpec {
        let (top_left_x, top_left_y) = self.transform.pixel_to_map(0.0, start_row as f64);
        GridSpec {
            rows: rows.min(self.rows.saturating_sub(start_row)),
            cols: self.cols,
            transform: GeoTransform { top_left_x, top_left_y, ..self.transform },
            crs: self.crs,
        }
    }

    /// Grids match when dimensions, CRS and transform agree to within 1e-9 of a pixel
    pub fn same_as(&self, other: &GridSpec) -> bool {
        let tol = 1e-9 * self.transform.pixel_width.abs().max(f64::MIN_POSITIVE);
        let t = &self.transform;
        let o = &other.transform;
        self.rows == other.rows
            && self.cols == other.cols
            && self.crs == other.crs
            && (t.top_left_x - o.top_left_x).abs() <= tol
            && (t.top_left_y - o.top_left_y).abs() <= tol
            && (t.pixel_width - o.pixel_width).abs() <= tol
            && (t.pixel_height - o.pixel_height).abs() <= tol
            && (t.rotation_x - o.rotation_x).abs() <= tol
            && (t.rotation_y - o.rotation_y).abs() <= tol
    }
}

/// Area of a lat/lon cell on the WGS84 ellipsoid.
///
/// Uses the authalic zone formula `A = b²Δλ/2 · |q(φ₂) − q(φ₁)|`.
pub fn ellipsoidal_cell_area(lat_a_deg: f64, lat_b_deg: f64, delta_lon_deg: f64) -> f64 {
    let e2 = WGS84_F * (2.0 - WGS84_F);
    let e = e2.sqrt();
    let b = WGS84_A * (1.0 - WGS84_F);
    let q = |lat_deg: f64| {
        let s = lat_deg.to_radians().sin();
        s / (1.0 - e2 * s * s) + ((1.0 + e * s) / (1.0 - e * s)).ln() / (2.0 * e)
    };
    0.5 * b * b * delta_lon_deg.to_radians() * (q(lat_a_deg) - q(lat_b_deg)).abs()
}

/// Single raster band with an explicit per-pixel validity channel
#[derive(Debug, Clone, PartialEq)]
pub struct Band {
    pub values: Array2<f32>,
    pub valid: Array2<bool>,
}

impl Band {
    /// Band whose finite pixels are all valid
    pub fn new(values: Array2<f32>) -> Self {
        let valid = values.mapv(|v| v.is_finite());
        Self { values, valid }
    }

    pub fn with_validity(values: Array2<f32>, valid: Array2<bool>) -> CoastalResult<Self> {
        if values.dim() != valid.dim() {
            return Err(CoastalError::GridMismatch(format!(
                "band values {:?} and validity {:?} differ in shape",
                values.dim(),
                valid.dim()
            )));
        }
        Ok(Self { values, valid })
    }

    /// Band with no valid pixel
    pub fn invalid(rows: usize, cols: usize) -> Self {
        Self {
            values: Array2::zeros((rows, cols)),
            valid: Array2::from_elem((rows, cols), false),
        }
    }

    pub fn dim(&self) -> (usize, usize) {
        self.values.dim()
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        match self.valid.get((row, col)) {
            Some(true) => self.values.get((row, col)).copied(),
            _ => None,
        }
    }

    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|&&v| v).count()
    }

    /// Invalidate every pixel where `mask` is false
    pub fn update_mask(&mut self, mask: &Array2<bool>) {
        self.valid.zip_mut_with(mask, |v, &m| *v = *v && m);
    }
}

/// Multi-band raster image on a single grid
#[derive(Debug, Clone)]
pub struct RasterImage {
    pub id: String,
    pub sensor: Option<SensorFamily>,
    pub acquired: NaiveDate,
    pub grid: GridSpec,
    pub bands: BTreeMap<String, Band>,
}

impl RasterImage {
    pub fn new(id: impl Into<String>, acquired: NaiveDate, grid: GridSpec) -> Self {
        Self {
            id: id.into(),
            sensor: None,
            acquired,
            grid,
            bands: BTreeMap::new(),
        }
    }

    pub fn with_sensor(mut self, sensor: SensorFamily) -> Self {
        self.sensor = Some(sensor);
        self
    }

    /// Add or replace a band; the band must match the image grid
    pub fn with_band(mut self, name: impl Into<String>, band: Band) -> CoastalResult<Self> {
        self.insert_band(name, band)?;
        Ok(self)
    }

    pub fn insert_band(&mut self, name: impl Into<String>, band: Band) -> CoastalResult<()> {
        let name = name.into();
        if band.dim() != self.grid.dim() {
            return Err(CoastalError::GridMismatch(format!(
                "band {} of image {} is {:?}, grid is {:?}",
                name,
                self.id,
                band.dim(),
                self.grid.dim()
            )));
        }
        self.bands.insert(name, band);
        Ok(())
    }

    pub fn band(&self, name: &str) -> Option<&Band> {
        self.bands.get(name)
    }

    pub fn require_band(&self, name: &str) -> CoastalResult<&Band> {
        self.bands.get(name).ok_or_else(|| CoastalError::MissingBand {
            image_id: self.id.clone(),
            band: name.to_string(),
        })
    }

    pub fn band_names(&self) -> Vec<&str> {
        self.bands.keys().map(String::as_str).collect()
    }

    pub fn footprint(&self) -> BoundingBox {
        self.grid.bounds()
    }
}

/// Error types for coastal change processing
#[derive(Debug, thiserror::Error)]
pub enum CoastalError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Grid mismatch: {0}")]
    GridMismatch(String),

    #[error("Image {image_id} is missing band {band}")]
    MissingBand { image_id: String, band: String },

    #[error("{operation} would process {requested} pixels, limit is {limit}")]
    ResourceLimitExceeded {
        operation: &'static str,
        limit: u64,
        requested: u64,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("XML parsing error: {0}")]
    XmlParsing(String),

    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

/// Result type for coastal change operations
pub type CoastalResult<T> = Result<T, CoastalError>;
