use crate::result::{TerrainError, TerrainResult};
use bevy::math::{Vec2, Vec3};

/// One of the four edges of a tile.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
    Bottom,
    Top,
}

impl Side {
    pub const ALL: [Side; 4] = [Side::Left, Side::Right, Side::Bottom, Side::Top];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn opposite(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
            Side::Bottom => Side::Top,
            Side::Top => Side::Bottom,
        }
    }
}

/// The scaling and coloring applied while building meshes.
#[derive(Clone, Debug, PartialEq)]
pub struct MeshStyle {
    pub pixel_scale: f64,
    /// The elevation substituted for missing samples.
    pub fill_value: f32,
    pub surface_color: [f32; 4],
    pub missing_color: [f32; 4],
}

/// The renderable geometry of a tile.
///
/// A regular grid with one vertex per elevation sample, drawn as one triangle strip per row.
/// Tiles without a single valid sample collapse into a flat quad covering the footprint of
/// the tile.
#[derive(Clone, Debug, PartialEq)]
pub struct TileMesh {
    columns: usize,
    rows: usize,
    pixel_width: f64,
    pixel_length: f64,
    empty: bool,
    positions: Vec<Vec3>,
    normals: Vec<Vec3>,
    colors: Vec<[f32; 4]>,
    tex_coords: Vec<Vec2>,
    indices: Vec<u32>,
    strip_lengths: Vec<u32>,
    // original edge data, indexed by side, used for stitching
    edges: [Vec<f32>; 4],
    edge_normals: [Vec<Vec3>; 4],
}

impl TileMesh {
    /// Builds the mesh of a tile from its row major elevation samples.
    pub fn new(
        samples: &[f32],
        columns: usize,
        rows: usize,
        pixel_width: f64,
        pixel_length: f64,
        style: &MeshStyle,
    ) -> TerrainResult<Self> {
        if columns < 2 || rows < 2 {
            return Err(TerrainError::EmptyRaster(columns, rows));
        }

        if samples.len() != columns * rows {
            return Err(TerrainError::BufferSize {
                expected: columns * rows,
                actual: samples.len(),
            });
        }

        if samples.iter().all(|sample| sample.is_nan()) {
            return Ok(Self::empty(columns, rows, pixel_width, pixel_length, style));
        }

        let width = pixel_width * (columns - 1) as f64;
        let length = pixel_length * (rows - 1) as f64;
        let fill = (style.fill_value as f64 * style.pixel_scale) as f32;

        let mut positions = Vec::with_capacity(samples.len());
        let mut colors = Vec::with_capacity(samples.len());
        let mut tex_coords = Vec::with_capacity(samples.len());

        for r in 0..rows {
            let y = (length / 2.0 - r as f64 * pixel_length) as f32;

            for c in 0..columns {
                let x = (-width / 2.0 + c as f64 * pixel_width) as f32;
                let sample = samples[r * columns + c];

                if sample.is_nan() {
                    positions.push(Vec3::new(x, y, fill));
                    colors.push(style.missing_color);
                } else {
                    positions.push(Vec3::new(x, y, (sample as f64 * style.pixel_scale) as f32));
                    colors.push(style.surface_color);
                }

                tex_coords.push(Vec2::new(
                    c as f32 / (columns - 1) as f32,
                    r as f32 / (rows - 1) as f32,
                ));
            }
        }

        let mut indices = Vec::with_capacity((rows - 1) * columns * 2);
        let mut strip_lengths = Vec::with_capacity(rows - 1);

        for r in 0..rows - 1 {
            for c in 0..columns {
                let i = (r * columns + c) as u32;
                indices.push(i);
                indices.push(i + columns as u32);
            }
            strip_lengths.push(2 * columns as u32);
        }

        let normals = vertex_normals(&positions, columns, rows);

        let mut mesh = Self {
            columns,
            rows,
            pixel_width,
            pixel_length,
            empty: false,
            positions,
            normals,
            colors,
            tex_coords,
            indices,
            strip_lengths,
            edges: Default::default(),
            edge_normals: Default::default(),
        };
        mesh.cache_edges();

        Ok(mesh)
    }

    /// A single flat quad covering the footprint of the tile, at the fill elevation.
    pub fn empty(
        columns: usize,
        rows: usize,
        pixel_width: f64,
        pixel_length: f64,
        style: &MeshStyle,
    ) -> Self {
        let width = (pixel_width * columns.saturating_sub(1) as f64) as f32;
        let length = (pixel_length * rows.saturating_sub(1) as f64) as f32;
        let z = style.fill_value;

        Self {
            columns,
            rows,
            pixel_width,
            pixel_length,
            empty: true,
            positions: vec![
                Vec3::new(-width / 2.0, length / 2.0, z),
                Vec3::new(-width / 2.0, -length / 2.0, z),
                Vec3::new(width / 2.0, -length / 2.0, z),
                Vec3::new(width / 2.0, length / 2.0, z),
            ],
            normals: vec![Vec3::Z; 4],
            colors: vec![style.missing_color; 4],
            tex_coords: vec![
                Vec2::new(0.0, 0.0),
                Vec2::new(0.0, 1.0),
                Vec2::new(1.0, 1.0),
                Vec2::new(1.0, 0.0),
            ],
            indices: vec![0, 1, 3, 2],
            strip_lengths: vec![4],
            edges: Default::default(),
            edge_normals: Default::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.empty
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn tile_width(&self) -> usize {
        self.columns - 1
    }

    pub fn tile_length(&self) -> usize {
        self.rows - 1
    }

    pub fn pixel_width(&self) -> f64 {
        self.pixel_width
    }

    pub fn pixel_length(&self) -> f64 {
        self.pixel_length
    }

    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    pub fn normals(&self) -> &[Vec3] {
        &self.normals
    }

    pub fn colors(&self) -> &[[f32; 4]] {
        &self.colors
    }

    pub fn tex_coords(&self) -> &[Vec2] {
        &self.tex_coords
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// The number of indices of each triangle strip.
    pub fn strip_lengths(&self) -> &[u32] {
        &self.strip_lengths
    }

    /// The smallest and largest elevation of the mesh.
    pub fn elevation_range(&self) -> (f32, f32) {
        self.positions
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(min, max), position| {
                (min.min(position.z), max.max(position.z))
            })
    }

    pub fn vertex(&self, c: usize, r: usize) -> Vec3 {
        if self.empty {
            let width = self.pixel_width * self.tile_width() as f64;
            let length = self.pixel_length * self.tile_length() as f64;

            return Vec3::new(
                (-width / 2.0 + c as f64 * self.pixel_width) as f32,
                (length / 2.0 - r as f64 * self.pixel_length) as f32,
                self.positions[0].z,
            );
        }

        self.positions[r * self.columns + c]
    }

    pub fn elevation(&self, c: usize, r: usize) -> f32 {
        if self.empty {
            return self.positions[0].z;
        }

        self.positions[r * self.columns + c].z
    }

    pub fn set_elevation(&mut self, c: usize, r: usize, elevation: f32) {
        if !self.empty {
            self.positions[r * self.columns + c].z = elevation;
        }
    }

    /// The normal at a sample, `None` for empty meshes.
    pub fn normal(&self, c: usize, r: usize) -> Option<Vec3> {
        if self.empty {
            return None;
        }

        Some(self.normals[r * self.columns + c])
    }

    pub fn set_normal(&mut self, c: usize, r: usize, normal: Vec3) {
        if !self.empty {
            self.normals[r * self.columns + c] = normal;
        }
    }

    /// The elevation of the sample nearest to a position relative to the lower left corner.
    pub fn elevation_nearest(&self, x: f64, y: f64) -> f32 {
        let c = ((x / self.pixel_width).round().max(0.0) as usize).min(self.tile_width());
        let r = ((y / self.pixel_length).round().max(0.0) as usize).min(self.tile_length());

        self.elevation(c, self.tile_length() - r)
    }

    /// The bilinear interpolated elevation at a position relative to the lower left corner.
    pub fn elevation_bilinear(&self, x: f64, y: f64) -> f32 {
        let x = (x / self.pixel_width).max(0.0);
        let y = (y / self.pixel_length).max(0.0);

        let c0 = (x.floor() as usize).min(self.tile_width());
        let c1 = (x.ceil() as usize).min(self.tile_width());
        let r0 = (y.floor() as usize).min(self.tile_length());
        let r1 = (y.ceil() as usize).min(self.tile_length());

        // rows count down from the top
        let top0 = self.tile_length() - r0;
        let top1 = self.tile_length() - r1;

        let lerp_x = |r: usize| {
            if c0 == c1 {
                self.elevation(c0, r) as f64
            } else {
                let t = (x - c0 as f64) / (c1 - c0) as f64;
                (1.0 - t) * self.elevation(c0, r) as f64 + t * self.elevation(c1, r) as f64
            }
        };

        let z0 = lerp_x(top0);

        if r0 == r1 {
            return z0 as f32;
        }

        let z1 = lerp_x(top1);
        let t = (y - r0 as f64) / (r1 - r0) as f64;

        ((1.0 - t) * z0 + t * z1) as f32
    }

    /// Recolors all vertices that are not missing.
    pub fn set_surface_color(&mut self, color: [f32; 4]) {
        for vertex_color in &mut self.colors {
            if vertex_color[3] != 0.0 {
                *vertex_color = color;
            }
        }
    }

    /// The elevations along a side, as they were when the mesh was built.
    pub fn edge(&self, side: Side) -> &[f32] {
        &self.edges[side.index()]
    }

    pub fn edge_normals(&self, side: Side) -> &[Vec3] {
        &self.edge_normals[side.index()]
    }

    fn edge_len(&self, side: Side) -> usize {
        match side {
            Side::Left | Side::Right => self.rows,
            Side::Bottom | Side::Top => self.columns,
        }
    }

    /// The vertex index of the `i`-th vertex along a side, counted from the top left.
    fn edge_index(&self, side: Side, i: usize) -> usize {
        match side {
            Side::Left => i * self.columns,
            Side::Right => i * self.columns + self.tile_width(),
            Side::Bottom => self.tile_length() * self.columns + i,
            Side::Top => i,
        }
    }

    fn cache_edges(&mut self) {
        for side in Side::ALL {
            let (edge, normals): (Vec<f32>, Vec<Vec3>) = (0..self.edge_len(side))
                .map(|i| {
                    let index = self.edge_index(side, i);
                    (self.positions[index].z, self.normals[index])
                })
                .unzip();

            self.edges[side.index()] = edge;
            self.edge_normals[side.index()] = normals;
        }
    }

    /// Resets a side to the elevations and normals it had when the mesh was built.
    pub fn restore_edge(&mut self, side: Side) {
        if self.empty {
            return;
        }

        for i in 0..self.edge_len(side) {
            let index = self.edge_index(side, i);
            self.positions[index].z = self.edges[side.index()][i];
            self.normals[index] = self.edge_normals[side.index()][i];
        }
    }

    /// Snaps a side of this mesh onto the coarser neighbor `that`.
    ///
    /// `ends` is the range of vertices along the opposite side of `that` which this side spans.
    /// Every n-th vertex of this side is copied from the original edge of `that`, and the
    /// vertices in between are interpolated linearly.
    pub fn fill_edge(&mut self, side: Side, ends: [u32; 2], that: &mut TileMesh) {
        if self.empty || that.empty || ends[1] <= ends[0] {
            return;
        }

        let begin = ends[0] as usize;
        let count = (ends[1] - ends[0]) as usize;
        let length = self.edge_len(side) - 1;
        let step = length / count;

        if step == 0 {
            return;
        }

        let opposite = side.opposite();

        for (j, source) in (0..=length).step_by(step).zip(begin..) {
            let (Some(&elevation), Some(&normal)) = (
                that.edges[opposite.index()].get(source),
                that.edge_normals[opposite.index()].get(source),
            ) else {
                break;
            };

            let index = self.edge_index(side, j);
            self.positions[index].z = elevation;
            self.normals[index] = normal;

            let index = that.edge_index(opposite, source);
            that.positions[index].z = elevation;
            that.normals[index] = normal;
        }

        for j in (0..length).step_by(step) {
            if j + step > length {
                break;
            }

            let start = self.edge_index(side, j);
            let end = self.edge_index(side, j + step);
            let (z0, z1) = (self.positions[start].z, self.positions[end].z);
            let (n0, n1) = (self.normals[start], self.normals[end]);

            for k in 1..step {
                let t = k as f32 / step as f32;
                let index = self.edge_index(side, j + k);

                self.positions[index].z = z0 + t * (z1 - z0);
                self.normals[index] = n0.lerp(n1, t).normalize_or_zero();
            }
        }
    }
}

fn face_normal(v0: Vec3, v1: Vec3, v2: Vec3) -> Vec3 {
    if v0.z.is_nan() || v1.z.is_nan() || v2.z.is_nan() {
        return Vec3::ZERO;
    }

    (v1 - v0).cross(v2 - v0).normalize_or_zero()
}

/// The unweighted average of the normals of the faces around each vertex.
fn vertex_normals(positions: &[Vec3], columns: usize, rows: usize) -> Vec<Vec3> {
    let mut normals = vec![Vec3::ZERO; positions.len()];
    let mut counts = vec![0u8; positions.len()];

    for r in 0..rows {
        for c in 0..columns {
            let k = r * columns + c;
            let vertex = positions[k];

            let below = (r + 1 < rows).then(|| positions[k + columns]);
            let above = (r > 0).then(|| positions[k - columns]);
            let right = (c + 1 < columns).then(|| positions[k + 1]);
            let left = (c > 0).then(|| positions[k - 1]);

            let faces = [
                below.zip(right).map(|(below, right)| face_normal(vertex, below, right)),
                left.zip(below).map(|(left, below)| face_normal(left, below, vertex)),
                above.zip(right).map(|(above, right)| face_normal(above, vertex, right)),
                above.zip(left).map(|(above, left)| face_normal(vertex, above, left)),
            ];

            for face in faces.into_iter().flatten() {
                normals[k] += face;
                counts[k] += 1;
            }
        }
    }

    for (normal, count) in normals.iter_mut().zip(counts) {
        if count > 0 {
            *normal /= count as f32;
        }
    }

    normals
}

#[cfg(test)]
mod tests {
    use super::*;

    fn style() -> MeshStyle {
        MeshStyle {
            pixel_scale: 1.0,
            fill_value: -5.0,
            surface_color: [1.0, 1.0, 1.0, 1.0],
            missing_color: [0.0; 4],
        }
    }

    fn mesh(columns: usize, rows: usize, elevation: impl Fn(usize, usize) -> f32) -> TileMesh {
        let samples = (0..rows)
            .flat_map(|r| (0..columns).map(move |c| (c, r)))
            .map(|(c, r)| elevation(c, r))
            .collect::<Vec<_>>();

        TileMesh::new(&samples, columns, rows, 1.0, 1.0, &style()).unwrap()
    }

    fn assert_close(a: Vec3, b: Vec3) {
        assert!((a - b).length() < 1e-5, "{a} != {b}");
    }

    #[test]
    fn flat_grid() {
        let mesh = mesh(5, 3, |_, _| 2.0);

        assert!(!mesh.is_empty());
        assert_eq!(mesh.positions().len(), 15);
        assert_eq!(mesh.vertex(0, 0), Vec3::new(-2.0, 1.0, 2.0));
        assert_eq!(mesh.vertex(4, 2), Vec3::new(2.0, -1.0, 2.0));
        assert_eq!(mesh.tex_coords()[14], Vec2::new(1.0, 1.0));
        assert!(mesh.normals().iter().all(|&normal| normal == Vec3::Z));

        assert_eq!(mesh.strip_lengths(), &[10, 10]);
        assert_eq!(&mesh.indices()[..4], &[0, 5, 1, 6]);
        assert_eq!(mesh.indices().len(), 20);
    }

    #[test]
    fn normals_of_a_slope() {
        let mesh = mesh(4, 4, |c, _| c as f32);
        let expected = Vec3::new(-1.0, 0.0, 1.0).normalize();

        for r in 0..4 {
            for c in 0..4 {
                assert_close(mesh.normal(c, r).unwrap(), expected);
            }
        }
    }

    #[test]
    fn missing_samples_are_filled() {
        let mesh = mesh(3, 3, |c, r| if (c, r) == (1, 1) { f32::NAN } else { 1.0 });

        assert_eq!(mesh.elevation(1, 1), -5.0);
        assert_eq!(mesh.colors()[4], [0.0; 4]);
        assert_eq!(mesh.colors()[0], [1.0; 4]);
        assert!(mesh.normals().iter().all(|normal| normal.is_finite()));
    }

    #[test]
    fn all_missing_tiles_collapse() {
        let mesh = mesh(513, 513, |_, _| f32::NAN);

        assert!(mesh.is_empty());
        assert_eq!(mesh.positions().len(), 4);
        assert_eq!(mesh.indices(), &[0, 1, 3, 2]);
        assert_eq!(mesh.strip_lengths(), &[4]);
        assert_eq!(mesh.positions()[0], Vec3::new(-256.0, 256.0, -5.0));
        assert_eq!(mesh.positions()[2], Vec3::new(256.0, -256.0, -5.0));
        assert_eq!(mesh.elevation(100, 100), -5.0);
        assert_eq!(mesh.vertex(512, 0), Vec3::new(256.0, 256.0, -5.0));
        assert_eq!(mesh.normal(0, 0), None);
    }

    #[test]
    fn interpolated_elevations() {
        // z grows to the east and to the north
        let mesh = mesh(5, 5, |c, r| c as f32 + 10.0 * (4 - r) as f32);

        assert_eq!(mesh.elevation_bilinear(1.5, 0.0), 1.5);
        assert_eq!(mesh.elevation_bilinear(2.0, 2.5), 27.0);
        assert_eq!(mesh.elevation_bilinear(4.0, 4.0), 44.0);
        assert_eq!(mesh.elevation_nearest(1.4, 2.6), 31.0);
        assert_eq!(mesh.elevation_nearest(9.0, 9.0), 44.0);
    }

    #[test]
    fn edges_are_cached() {
        let mut mesh = mesh(3, 4, |c, r| (10 * r + c) as f32);

        assert_eq!(mesh.edge(Side::Left), &[0.0, 10.0, 20.0, 30.0]);
        assert_eq!(mesh.edge(Side::Right), &[2.0, 12.0, 22.0, 32.0]);
        assert_eq!(mesh.edge(Side::Bottom), &[30.0, 31.0, 32.0]);
        assert_eq!(mesh.edge(Side::Top), &[0.0, 1.0, 2.0]);

        mesh.set_elevation(0, 1, 99.0);
        mesh.restore_edge(Side::Left);
        assert_eq!(mesh.elevation(0, 1), 10.0);
    }

    #[test]
    fn fill_edge_from_coarser_neighbor() {
        let mut fine = mesh(5, 5, |_, _| 0.0);
        let mut coarse = mesh(5, 5, |_, r| 10.0 * r as f32);
        coarse.set_elevation(0, 1, 123.0);

        // the right side of the fine tile spans the upper half of the left side of the coarse one
        fine.fill_edge(Side::Right, [0, 2], &mut coarse);

        let right = (0..5).map(|r| fine.elevation(4, r)).collect::<Vec<_>>();
        assert_eq!(right, vec![0.0, 5.0, 10.0, 15.0, 20.0]);
        assert_eq!(coarse.elevation(0, 1), 10.0);
        assert_eq!(fine.elevation(3, 1), 0.0);
    }

    #[test]
    fn surface_color_skips_missing() {
        let mut mesh = mesh(2, 2, |c, _| if c == 0 { f32::NAN } else { 1.0 });

        mesh.set_surface_color([0.5, 0.5, 0.5, 1.0]);

        assert_eq!(mesh.colors()[0], [0.0; 4]);
        assert_eq!(mesh.colors()[1], [0.5, 0.5, 0.5, 1.0]);
    }
}
