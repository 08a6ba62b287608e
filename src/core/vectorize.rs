//! Raster-to-polygon conversion of class masks
//!
//! Member pixels are grouped into connected components, and the boundary of
//! each component is traced along pixel edges into closed rings. Rings are
//! built in pixel-corner coordinates, where an exterior ring runs clockwise
//! (positive shoelace area with rows growing downwards) and a hole runs
//! counter-clockwise, and are mapped to the grid CRS at the end.
//!
//! Where two boundary edges leave the same corner (diagonally touching
//! pixels), 8-connected tracing turns left so diagonal neighbours stay in one
//! ring, while 4-connected tracing turns right and splits them.

use crate::config::{ReductionParams, DEFAULT_SCALE_M, DEFAULT_VECTORIZE_MAX_PIXELS};
use crate::core::classify::Mask;
use crate::core::composite::aoi_mask;
use crate::types::{CoastalResult, CoordinateSystem, GridSpec};
use geo::algorithm::orient::{Direction, Orient};
use geo::{Area, Coord, GeodesicArea, LineString, Polygon};
use ndarray::{Array2, Zip};
use std::collections::HashMap;

/// Vectorization parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VectorizeParams {
    /// Nominal resolution in meters at which the mask is vectorized
    pub scale: f64,
    /// Fail instead of vectorizing a grid with more pixels than this
    pub max_pixels: u64,
    /// Connect diagonal neighbours
    pub eight_connected: bool,
}

impl Default for VectorizeParams {
    fn default() -> Self {
        Self {
            scale: DEFAULT_SCALE_M,
            max_pixels: DEFAULT_VECTORIZE_MAX_PIXELS,
            eight_connected: true,
        }
    }
}

/// One connected region of a mask as a polygon in the grid CRS
#[derive(Debug, Clone, PartialEq)]
pub struct ShorelineFeature {
    pub year: i32,
    /// Component label, starting at 1 in raster scan order
    pub label: u32,
    pub pixel_count: usize,
    pub polygon: Polygon<f64>,
}

/// Polygons extracted from one mask
#[derive(Debug, Clone)]
pub struct ShorelineSet {
    pub year: i32,
    pub crs: CoordinateSystem,
    pub features: Vec<ShorelineFeature>,
}

impl ShorelineSet {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Area of one feature in square meters
    pub fn feature_area_m2(&self, feature: &ShorelineFeature) -> f64 {
        match self.crs {
            CoordinateSystem::Geographic => feature.polygon.geodesic_area_unsigned(),
            CoordinateSystem::Projected { .. } => feature.polygon.unsigned_area(),
        }
    }

    /// Summed area of every feature in square meters
    pub fn total_area_m2(&self) -> f64 {
        self.features.iter().map(|f| self.feature_area_m2(f)).sum()
    }
}

type Vertex = (i64, i64);

#[derive(Debug, Clone, Copy)]
struct Edge {
    from: Vertex,
    to: Vertex,
}

impl Edge {
    fn direction(&self) -> Vertex {
        (self.to.0 - self.from.0, self.to.1 - self.from.1)
    }
}

/// Converts masks into polygon features
#[derive(Debug, Clone, Copy)]
pub struct Vectorizer {
    params: VectorizeParams,
}

impl Vectorizer {
    pub fn new(params: VectorizeParams) -> Self {
        Self { params }
    }

    pub fn standard() -> Self {
        Self::new(VectorizeParams::default())
    }

    /// Polygons of every connected group of member pixels inside the AOI
    pub fn vectorize(&self, mask: &Mask, aoi: &Polygon<f64>) -> CoastalResult<ShorelineSet> {
        let reduced = mask.self_mask().at_scale(self.params.scale);
        let grid = reduced.grid;
        ReductionParams { scale: self.params.scale, max_pixels: self.params.max_pixels }
            .check("reduce_to_vectors", grid.pixel_count())?;

        let inside = aoi_mask(&grid, aoi);
        let members = Zip::from(&reduced.values)
            .and(&reduced.valid)
            .and(&inside)
            .map_collect(|&m, &v, &i| m && v && i);

        let (labels, sizes) = label_components(&members, self.params.eight_connected);
        log::debug!(
            "{} mask {}: {} components ({}-connected)",
            mask.kind,
            mask.year,
            sizes.len(),
            if self.params.eight_connected { 8 } else { 4 }
        );

        let mut edges: Vec<Vec<Edge>> = vec![Vec::new(); sizes.len()];
        collect_boundary_edges(&labels, &mut edges);

        let mut features = Vec::with_capacity(sizes.len());
        for (idx, component_edges) in edges.iter().enumerate() {
            let rings = trace_rings(component_edges, self.params.eight_connected);
            let label = idx as u32 + 1;
            for polygon in assemble_polygons(rings, &grid) {
                features.push(ShorelineFeature {
                    year: mask.year,
                    label,
                    pixel_count: sizes[idx],
                    polygon,
                });
            }
        }

        if features.is_empty() {
            log::warn!("{} mask {} produced no polygons", mask.kind, mask.year);
        } else {
            log::info!("Extracted {} polygons from {} mask {}", features.len(), mask.kind, mask.year);
        }

        Ok(ShorelineSet { year: mask.year, crs: grid.crs, features })
    }
}

impl Default for Vectorizer {
    fn default() -> Self {
        Self::standard()
    }
}

/// Label connected member pixels; returns labels (0 = background) and pixel count per label
fn label_components(members: &Array2<bool>, eight_connected: bool) -> (Array2<u32>, Vec<usize>) {
    const FOUR: [(isize, isize); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];
    const EIGHT: [(isize, isize); 8] = [
        (-1, -1), (-1, 0), (-1, 1),
        (0, -1), (0, 1),
        (1, -1), (1, 0), (1, 1),
    ];
    let neighbours: &[(isize, isize)] = if eight_connected { &EIGHT } else { &FOUR };

    let (rows, cols) = members.dim();
    let mut labels = Array2::<u32>::zeros((rows, cols));
    let mut sizes = Vec::new();
    let mut stack = Vec::new();

    for start_row in 0..rows {
        for start_col in 0..cols {
            if !members[[start_row, start_col]] || labels[[start_row, start_col]] != 0 {
                continue;
            }
            sizes.push(0usize);
            let label = sizes.len() as u32;
            labels[[start_row, start_col]] = label;
            stack.push((start_row, start_col));

            while let Some((r, c)) = stack.pop() {
                sizes[label as usize - 1] += 1;
                for &(dr, dc) in neighbours {
                    let (nr, nc) = (r as isize + dr, c as isize + dc);
                    if nr < 0 || nc < 0 || nr >= rows as isize || nc >= cols as isize {
                        continue;
                    }
                    let (nr, nc) = (nr as usize, nc as usize);
                    if members[[nr, nc]] && labels[[nr, nc]] == 0 {
                        labels[[nr, nc]] = label;
                        stack.push((nr, nc));
                    }
                }
            }
        }
    }
    (labels, sizes)
}

/// Emit each pixel side that separates a component from anything else.
///
/// Vertices are (x, y) pixel corners; every component is kept on the right.
fn collect_boundary_edges(labels: &Array2<u32>, edges: &mut [Vec<Edge>]) {
    let (rows, cols) = labels.dim();
    let label_at = |r: isize, c: isize| -> u32 {
        if r < 0 || c < 0 || r >= rows as isize || c >= cols as isize {
            0
        } else {
            labels[[r as usize, c as usize]]
        }
    };

    for ((r, c), &label) in labels.indexed_iter() {
        if label == 0 {
            continue;
        }
        let out = &mut edges[label as usize - 1];
        let (ri, ci) = (r as isize, c as isize);
        let (x, y) = (c as i64, r as i64);
        if label_at(ri - 1, ci) != label {
            out.push(Edge { from: (x, y), to: (x + 1, y) });
        }
        if label_at(ri, ci + 1) != label {
            out.push(Edge { from: (x + 1, y), to: (x + 1, y + 1) });
        }
        if label_at(ri + 1, ci) != label {
            out.push(Edge { from: (x + 1, y + 1), to: (x, y + 1) });
        }
        if label_at(ri, ci - 1) != label {
            out.push(Edge { from: (x, y + 1), to: (x, y) });
        }
    }
}

/// Link boundary edges into closed rings of corner vertices (without the closing repeat)
fn trace_rings(edges: &[Edge], eight_connected: bool) -> Vec<Vec<Vertex>> {
    let mut outgoing: HashMap<Vertex, Vec<usize>> = HashMap::new();
    for (idx, edge) in edges.iter().enumerate() {
        outgoing.entry(edge.from).or_default().push(idx);
    }

    let next_edge = |current: &Edge| -> Option<usize> {
        let candidates = outgoing.get(&current.to)?;
        if candidates.len() == 1 {
            return Some(candidates[0]);
        }
        let (dx, dy) = current.direction();
        let left = (dy, -dx);
        let right = (-dy, dx);
        let preference = if eight_connected {
            [left, (dx, dy), right]
        } else {
            [right, (dx, dy), left]
        };
        preference.iter().find_map(|want| {
            candidates
                .iter()
                .copied()
                .find(|&i| edges[i].direction() == *want)
        })
    };

    let mut used = vec![false; edges.len()];
    let mut rings = Vec::new();
    for start in 0..edges.len() {
        if used[start] {
            continue;
        }
        let mut ring = Vec::new();
        let mut current = start;
        loop {
            used[current] = true;
            ring.push(edges[current].from);
            match next_edge(&edges[current]) {
                Some(next) if next != start && !used[next] => current = next,
                _ => break,
            }
        }
        rings.push(simplify_ring(ring));
    }
    rings
}

/// Drop vertices lying on a straight run between their neighbours
fn simplify_ring(ring: Vec<Vertex>) -> Vec<Vertex> {
    let n = ring.len();
    if n < 4 {
        return ring;
    }
    (0..n)
        .filter(|&i| {
            let prev = ring[(i + n - 1) % n];
            let here = ring[i];
            let next = ring[(i + 1) % n];
            let a = (here.0 - prev.0, here.1 - prev.1);
            let b = (next.0 - here.0, next.1 - here.1);
            a.0 * b.1 - a.1 * b.0 != 0
        })
        .map(|i| ring[i])
        .collect()
}

/// Twice the signed shoelace area; positive for exteriors in pixel orientation
fn doubled_area(ring: &[Vertex]) -> i64 {
    let n = ring.len();
    (0..n)
        .map(|i| {
            let (x0, y0) = ring[i];
            let (x1, y1) = ring[(i + 1) % n];
            x0 * y1 - x1 * y0
        })
        .sum()
}

/// Build polygons from one component's rings: the largest exterior carries the holes
fn assemble_polygons(rings: Vec<Vec<Vertex>>, grid: &GridSpec) -> Vec<Polygon<f64>> {
    let to_line = |ring: &[Vertex]| -> LineString<f64> {
        let mut coords: Vec<Coord<f64>> = ring
            .iter()
            .map(|&(x, y)| {
                let (mx, my) = grid.transform.pixel_to_map(x as f64, y as f64);
                Coord { x: mx, y: my }
            })
            .collect();
        if let Some(&first) = coords.first() {
            coords.push(first);
        }
        LineString::from(coords)
    };

    let mut exteriors: Vec<(i64, Vec<Vertex>)> = Vec::new();
    let mut holes = Vec::new();
    for ring in rings.into_iter().filter(|r| r.len() >= 4) {
        let area = doubled_area(&ring);
        if area > 0 {
            exteriors.push((area, ring));
        } else if area < 0 {
            holes.push(to_line(&ring));
        }
    }
    exteriors.sort_by(|a, b| b.0.cmp(&a.0));

    let mut polygons = Vec::with_capacity(exteriors.len());
    let mut holes = Some(holes);
    for (_, ring) in &exteriors {
        let interiors = holes.take().unwrap_or_default();
        polygons.push(Polygon::new(to_line(ring), interiors).orient(Direction::Default));
    }
    polygons
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classify::MaskKind;
    use crate::types::{BoundingBox, CoastalError};
    use approx::assert_relative_eq;

    fn projected_grid(rows: usize, cols: usize) -> GridSpec {
        GridSpec::covering(
            &BoundingBox {
                min_lon: 500_000.0,
                max_lon: 500_000.0 + 30.0 * cols as f64,
                min_lat: 2_800_000.0,
                max_lat: 2_800_000.0 + 30.0 * rows as f64,
            },
            30.0,
            CoordinateSystem::Projected { epsg: 32617 },
        )
    }

    fn mask_from(rows: &[&str], grid: GridSpec) -> Mask {
        let height = rows.len();
        let width = rows[0].len();
        let values = Array2::from_shape_fn((height, width), |(r, c)| rows[r].as_bytes()[c] == b'#');
        Mask {
            year: 2020,
            kind: MaskKind::Water,
            values,
            valid: Array2::from_elem((height, width), true),
            grid,
        }
    }

    fn whole_grid(grid: &GridSpec) -> Polygon<f64> {
        let b = grid.bounds();
        Polygon::new(
            LineString::from(vec![
                (b.min_lon - 1.0, b.min_lat - 1.0),
                (b.max_lon + 1.0, b.min_lat - 1.0),
                (b.max_lon + 1.0, b.max_lat + 1.0),
                (b.min_lon - 1.0, b.max_lat + 1.0),
            ]),
            vec![],
        )
    }

    fn vectorize(rows: &[&str], eight_connected: bool) -> ShorelineSet {
        let grid = projected_grid(rows.len(), rows[0].len());
        let mask = mask_from(rows, grid);
        let params = VectorizeParams { eight_connected, ..VectorizeParams::default() };
        Vectorizer::new(params).vectorize(&mask, &whole_grid(&grid)).unwrap()
    }

    #[test]
    fn test_single_block_is_one_rectangle() {
        let set = vectorize(&["....", ".##.", ".##.", "...."], true);
        assert_eq!(set.len(), 1);
        let feature = &set.features[0];
        assert_eq!(feature.pixel_count, 4);
        // Collinear corners removed: 4 vertices plus the closing one
        assert_eq!(feature.polygon.exterior().0.len(), 5);
        assert_relative_eq!(set.total_area_m2(), 4.0 * 900.0);
    }

    #[test]
    fn test_ring_with_hole() {
        let set = vectorize(&["#####", "#...#", "#.#.#", "#...#", "#####"], true);
        assert_eq!(set.len(), 2);
        let ring = set.features.iter().find(|f| f.pixel_count == 16).unwrap();
        assert_eq!(ring.polygon.interiors().len(), 1);
        assert_relative_eq!(set.total_area_m2(), 17.0 * 900.0);
    }

    #[test]
    fn test_diagonal_pixels_depend_on_connectivity() {
        let pattern = ["#..", ".#.", "..#"];
        let eight = vectorize(&pattern, true);
        assert_eq!(eight.len(), 1);
        assert_eq!(eight.features[0].pixel_count, 3);

        let four = vectorize(&pattern, false);
        assert_eq!(four.len(), 3);
        assert_relative_eq!(eight.total_area_m2(), four.total_area_m2());
    }

    #[test]
    fn test_area_matches_pixel_count_for_irregular_shapes() {
        let rows = ["##..#", "#.#.#", "####.", "..#.#", "#.###"];
        for eight in [true, false] {
            let set = vectorize(&rows, eight);
            let members = rows.iter().flat_map(|r| r.bytes()).filter(|&b| b == b'#').count();
            assert_relative_eq!(set.total_area_m2(), members as f64 * 900.0, epsilon = 1e-6);
            let pixels: usize = {
                let mut seen = std::collections::BTreeMap::new();
                for f in &set.features {
                    seen.insert(f.label, f.pixel_count);
                }
                seen.values().sum()
            };
            assert_eq!(pixels, members);
        }
    }

    #[test]
    fn test_exteriors_are_counter_clockwise_in_map_space() {
        let set = vectorize(&["##", "#."], true);
        assert!(set.features[0].polygon.signed_area() > 0.0);
    }

    #[test]
    fn test_invalid_pixels_are_not_vectorized() {
        let grid = projected_grid(2, 2);
        let mut mask = mask_from(&["##", "##"], grid);
        mask.valid[[0, 0]] = false;
        let set = Vectorizer::standard().vectorize(&mask, &whole_grid(&grid)).unwrap();
        assert_relative_eq!(set.total_area_m2(), 3.0 * 900.0);
    }

    #[test]
    fn test_empty_mask_yields_no_polygons() {
        let set = vectorize(&["...", "..."], true);
        assert!(set.is_empty());
        assert_eq!(set.total_area_m2(), 0.0);
    }

    #[test]
    fn test_pixel_ceiling_fails_fast() {
        let grid = projected_grid(4, 4);
        let mask = mask_from(&["####"; 4], grid);
        let params = VectorizeParams { max_pixels: 15, ..VectorizeParams::default() };
        match Vectorizer::new(params).vectorize(&mask, &whole_grid(&grid)) {
            Err(CoastalError::ResourceLimitExceeded { operation, limit, requested }) => {
                assert_eq!(operation, "reduce_to_vectors");
                assert_eq!(limit, 15);
                assert_eq!(requested, 16);
            }
            other => panic!("unexpected: {:?}", other.map(|s| s.len())),
        }
    }

    #[test]
    fn test_coarser_scale_reduces_pixels() {
        let grid = projected_grid(4, 4);
        let mask = mask_from(&["####"; 4], grid);
        let params = VectorizeParams { scale: 60.0, max_pixels: 4, ..VectorizeParams::default() };
        let set = Vectorizer::new(params).vectorize(&mask, &whole_grid(&grid)).unwrap();
        assert_eq!(set.len(), 1);
        assert_relative_eq!(set.total_area_m2(), 16.0 * 900.0);
    }

    #[test]
    fn test_geographic_area_matches_cell_areas() {
        let grid = GridSpec {
            rows: 10,
            cols: 10,
            transform: crate::types::GeoTransform {
                top_left_x: -81.0,
                pixel_width: 0.001,
                rotation_x: 0.0,
                top_left_y: 25.01,
                rotation_y: 0.0,
                pixel_height: -0.001,
            },
            crs: CoordinateSystem::Geographic,
        };
        let rows = vec!["##########"; 10];
        let mask = mask_from(&rows, grid);
        let set = Vectorizer::standard().vectorize(&mask, &whole_grid(&grid)).unwrap();
        let expected: f64 = grid.row_areas().iter().map(|a| a * 10.0).sum();
        assert_relative_eq!(set.total_area_m2(), expected, max_relative = 1e-3);
    }
}
