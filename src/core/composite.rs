use crate::config::DEFAULT_COMPOSITE_TILE_ROWS;
use crate::io::collection::ImageCollection;
use crate::types::{Band, CanonicalBand, CoastalError, CoastalResult, GridSpec, RasterImage};
use chrono::NaiveDate;
use geo::{Coord, Intersects, Point, Polygon, Rect};
use ndarray::{s, Array2, Array3, ArrayView1, ArrayView2, ArrayView3, Axis, Zip};
use num_traits::Float;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;

/// Whether a composite holds any observation at all
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompositeStatus {
    Valid,
    /// No image passed the filters, or every pixel was masked
    Empty,
}

/// Per-pixel median of one year of imagery
#[derive(Debug, Clone)]
pub struct Composite {
    pub year: i32,
    pub image: RasterImage,
    /// Number of valid observations behind each pixel
    pub observation_count: Array2<u32>,
    /// Images that were reduced into the composite
    pub source_count: usize,
    pub status: CompositeStatus,
}

impl Composite {
    pub fn is_empty(&self) -> bool {
        self.status == CompositeStatus::Empty
    }

    pub fn grid(&self) -> &GridSpec {
        &self.image.grid
    }
}

/// Compositing parameters
#[derive(Debug, Clone)]
pub struct CompositeParams {
    /// Bands reduced into the composite
    pub bands: Vec<String>,
    /// Grid rows reduced per pass. Only the samples of one tile are held at a
    /// time; an image is read once for every tile its footprint touches.
    pub tile_rows: usize,
}

impl Default for CompositeParams {
    fn default() -> Self {
        Self {
            bands: CanonicalBand::ALL.iter().map(|b| b.name().to_string()).collect(),
            tile_rows: DEFAULT_COMPOSITE_TILE_ROWS,
        }
    }
}

/// Medians of one tile, per band, with the per-pixel observation count
struct TileMedians {
    bands: Vec<Band>,
    observation_count: Array2<u32>,
}

/// Reduces an image collection to one median image per year on a fixed grid
pub struct TemporalCompositor {
    grid: GridSpec,
    aoi_mask: Array2<bool>,
    params: CompositeParams,
}

impl TemporalCompositor {
    pub fn new(grid: GridSpec, aoi: &Polygon<f64>) -> Self {
        Self::with_params(grid, aoi, CompositeParams::default())
    }

    pub fn with_params(grid: GridSpec, aoi: &Polygon<f64>, params: CompositeParams) -> Self {
        let aoi_mask = aoi_mask(&grid, aoi);
        log::debug!(
            "Compositor grid {}x{} in tiles of {} rows, {} pixels inside AOI",
            grid.rows,
            grid.cols,
            params.tile_rows,
            aoi_mask.iter().filter(|&&m| m).count()
        );
        Self { grid, aoi_mask, params }
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    /// Median composite of the images acquired from Jan 1 to Dec 31 of `year`
    pub fn composite_year<C>(&self, collection: &C, year: i32) -> CoastalResult<Composite>
    where
        C: ImageCollection + Clone,
    {
        let start = year_start(year)?;
        let end = NaiveDate::from_ymd_opt(year, 12, 31)
            .ok_or_else(|| CoastalError::Config(format!("Year {} is out of range", year)))?;

        let filtered = collection.clone().filter_date(start, end);
        log::info!("Compositing {}: {} candidate scenes", year, filtered.len());
        self.composite(&filtered, year)
    }

    /// Median composite of every image of an already filtered collection, one row tile at a time
    pub fn composite<C>(&self, collection: &C, year: i32) -> CoastalResult<Composite>
    where
        C: ImageCollection + Clone,
    {
        let (rows, cols) = self.grid.dim();
        let tile_rows = self.params.tile_rows.max(1);
        let mut values: Vec<Array2<f32>> = self
            .params
            .bands
            .iter()
            .map(|_| Array2::zeros((rows, cols)))
            .collect();
        let mut valid: Vec<Array2<bool>> = self
            .params
            .bands
            .iter()
            .map(|_| Array2::from_elem((rows, cols), false))
            .collect();
        let mut observation_count = Array2::<u32>::zeros((rows, cols));
        let mut sources: HashSet<String> = HashSet::new();
        let mut excluded: HashSet<String> = HashSet::new();

        for start in (0..rows).step_by(tile_rows) {
            let tile = self.grid.row_window(start, tile_rows);
            let end = start + tile.rows;
            let inside = self.aoi_mask.slice(s![start..end, ..]);
            if !inside.iter().any(|&m| m) {
                continue;
            }

            let candidates = collection.clone().filter_bounds(&bounds_polygon(&tile));
            log::debug!(
                "Composite {} rows {}..{}: {} candidate images",
                year,
                start,
                end,
                candidates.len()
            );
            let medians = self.reduce_tile(&candidates, &tile, inside, year, &mut sources, &mut excluded)?;

            for ((band, v), ok) in medians.bands.iter().zip(values.iter_mut()).zip(valid.iter_mut()) {
                v.slice_mut(s![start..end, ..]).assign(&band.values);
                ok.slice_mut(s![start..end, ..]).assign(&band.valid);
            }
            observation_count
                .slice_mut(s![start..end, ..])
                .assign(&medians.observation_count);
        }

        let mut image = RasterImage::new(format!("composite_{}", year), year_start(year)?, self.grid);
        for ((name, v), ok) in self.params.bands.iter().zip(values).zip(valid) {
            image.insert_band(name.clone(), Band::with_validity(v, ok)?)?;
        }

        let source_count = sources.len();
        let has_data = observation_count.iter().any(|&c| c > 0);
        let status = if source_count > 0 && has_data {
            CompositeStatus::Valid
        } else {
            CompositeStatus::Empty
        };

        match status {
            CompositeStatus::Valid => log::info!(
                "Composite {} built from {} images, {} observed pixels",
                year,
                source_count,
                observation_count.iter().filter(|&&c| c > 0).count()
            ),
            CompositeStatus::Empty => log::warn!(
                "Composite {} is empty ({} images reduced, no valid observation)",
                year,
                source_count
            ),
        }

        Ok(Composite { year, image, observation_count, source_count, status })
    }

    /// Stack every image of `collection` over one tile and take per-pixel medians.
    ///
    /// Samples are held in one `(images, rows, cols)` array per band with NaN
    /// where an image has no valid observation.
    fn reduce_tile<C: ImageCollection>(
        &self,
        collection: &C,
        tile: &GridSpec,
        inside: ArrayView2<bool>,
        year: i32,
        sources: &mut HashSet<String>,
        excluded: &mut HashSet<String>,
    ) -> CoastalResult<TileMedians> {
        let (rows, cols) = tile.dim();
        let mut stacks: Vec<Vec<f32>> = vec![Vec::new(); self.params.bands.len()];
        let mut layers = 0usize;

        collection.for_each_image(|image| {
            let mut resampled = Vec::with_capacity(self.params.bands.len());
            for name in &self.params.bands {
                match image.band(name) {
                    Some(band) => resampled.push(resample_nearest(band, &image.grid, tile)?),
                    None => {
                        if excluded.insert(image.id.clone()) {
                            log::warn!("Excluding {} from {} composite: missing band {}", image.id, year, name);
                        }
                        return Ok(());
                    }
                }
            }

            for (stack, band) in stacks.iter_mut().zip(&resampled) {
                stack.extend(
                    Zip::from(&band.values)
                        .and(&band.valid)
                        .and(&inside)
                        .map_collect(|&v, &ok, &ins| if ok && ins { v } else { f32::NAN })
                        .iter(),
                );
            }
            layers += 1;
            sources.insert(image.id);
            Ok(())
        })?;

        let mut bands = Vec::with_capacity(stacks.len());
        let mut observation_count = Array2::<u32>::zeros((rows, cols));
        for stack in stacks {
            let stack = Array3::from_shape_vec((layers, rows, cols), stack)
                .map_err(|e| CoastalError::Processing(format!("Composite stack shape: {}", e)))?;
            let (band, counts) = reduce_medians(stack.view());
            Zip::from(&mut observation_count)
                .and(&counts)
                .for_each(|total, &c| *total = (*total).max(c));
            bands.push(band);
        }
        Ok(TileMedians { bands, observation_count })
    }
}

fn year_start(year: i32) -> CoastalResult<NaiveDate> {
    NaiveDate::from_ymd_opt(year, 1, 1)
        .ok_or_else(|| CoastalError::Config(format!("Year {} is out of range", year)))
}

/// Per-pixel median over the first axis, skipping NaN samples
fn reduce_medians(stack: ArrayView3<f32>) -> (Band, Array2<u32>) {
    let (_, rows, cols) = stack.dim();
    let mut values = Array2::<f32>::zeros((rows, cols));
    let mut valid = Array2::from_elem((rows, cols), false);
    let mut counts = Array2::<u32>::zeros((rows, cols));

    let zip = Zip::from(&mut values)
        .and(&mut valid)
        .and(&mut counts)
        .and(stack.lanes(Axis(0)));
    let reduce = |value: &mut f32, ok: &mut bool, count: &mut u32, samples: ArrayView1<f32>| {
        let mut observed: Vec<f32> = samples.iter().copied().filter(|v| !v.is_nan()).collect();
        *count = observed.len() as u32;
        if let Some(m) = median(&mut observed) {
            *value = m;
            *ok = true;
        }
    };

    #[cfg(feature = "parallel")]
    zip.par_for_each(reduce);
    #[cfg(not(feature = "parallel"))]
    zip.for_each(reduce);

    (Band { values, valid }, counts)
}

/// Rectangle covered by a grid, as a polygon
fn bounds_polygon(grid: &GridSpec) -> Polygon<f64> {
    let b = grid.bounds();
    Rect::new(Coord { x: b.min_lon, y: b.min_lat }, Coord { x: b.max_lon, y: b.max_lat }).to_polygon()
}

/// Median of the values; the mean of the two middle values for an even count
pub fn median<T: Float>(values: &mut [T]) -> Option<T> {
    if values.is_empty() {
        return None;
    }
    values.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        let two = T::one() + T::one();
        Some((values[mid - 1] + values[mid]) / two)
    }
}

/// Pixels of `grid` whose centre lies inside (or on the boundary of) the AOI
pub fn aoi_mask(grid: &GridSpec, aoi: &Polygon<f64>) -> Array2<bool> {
    Array2::from_shape_fn(grid.dim(), |(row, col)| {
        let (x, y) = grid.pixel_center(row, col);
        aoi.intersects(&Point::new(x, y))
    })
}

/// Nearest-neighbour resampling of a band onto another north-up grid in the same CRS.
///
/// Target pixels whose centre falls outside the source extent are invalid.
pub fn resample_nearest(band: &Band, source: &GridSpec, target: &GridSpec) -> CoastalResult<Band> {
    if band.dim() != source.dim() {
        return Err(CoastalError::GridMismatch(format!(
            "band is {:?}, its grid is {:?}",
            band.dim(),
            source.dim()
        )));
    }
    if source.same_as(target) {
        return Ok(band.clone());
    }
    if source.crs != target.crs {
        return Err(CoastalError::GridMismatch(format!(
            "cannot resample from {:?} to {:?} without reprojection",
            source.crs, target.crs
        )));
    }
    if !source.transform.is_north_up() || !target.transform.is_north_up() {
        return Err(CoastalError::GridMismatch("rotated grids are not supported".to_string()));
    }

    let source_index = |fractional: f64, len: usize| -> Option<usize> {
        let idx = fractional.floor();
        (idx >= 0.0 && idx < len as f64).then_some(idx as usize)
    };
    let col_index: Vec<Option<usize>> = (0..target.cols)
        .map(|col| {
            let (x, y) = target.pixel_center(0, col);
            source_index(source.transform.map_to_pixel(x, y).0, source.cols)
        })
        .collect();
    let row_index: Vec<Option<usize>> = (0..target.rows)
        .map(|row| {
            let (x, y) = target.pixel_center(row, 0);
            source_index(source.transform.map_to_pixel(x, y).1, source.rows)
        })
        .collect();

    let mut out = Band::invalid(target.rows, target.cols);
    for (row, src_row) in row_index.iter().enumerate() {
        let Some(sr) = *src_row else { continue };
        for (col, src_col) in col_index.iter().enumerate() {
            let Some(sc) = *src_col else { continue };
            if let Some(v) = band.get(sr, sc) {
                out.values[[row, col]] = v;
                out.valid[[row, col]] = true;
            }
        }
    }
    Ok(out)
}
