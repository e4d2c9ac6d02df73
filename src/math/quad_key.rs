use crate::result::{TerrainError, TerrainResult};
use bevy::math::DVec3;
use std::{fmt, str::FromStr};

//  +---+---+
//  | 1 | 2 |
//  +---+---+
//  | 3 | 4 |
//  +---+---+

/// One of the four children of a quadtree tile.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
#[repr(u8)]
pub enum Quadrant {
    NorthWest = 1,
    NorthEast = 2,
    SouthWest = 3,
    SouthEast = 4,
}

impl Quadrant {
    pub const ALL: [Quadrant; 4] = [
        Quadrant::NorthWest,
        Quadrant::NorthEast,
        Quadrant::SouthWest,
        Quadrant::SouthEast,
    ];

    /// The zero based index of the quadrant, used for child arrays.
    #[inline]
    pub fn index(self) -> usize {
        self as usize - 1
    }

    #[inline]
    pub fn is_east(self) -> bool {
        matches!(self, Quadrant::NorthEast | Quadrant::SouthEast)
    }

    #[inline]
    pub fn is_south(self) -> bool {
        matches!(self, Quadrant::SouthWest | Quadrant::SouthEast)
    }
}

impl TryFrom<u8> for Quadrant {
    type Error = TerrainError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Quadrant::NorthWest),
            2 => Ok(Quadrant::NorthEast),
            3 => Ok(Quadrant::SouthWest),
            4 => Ok(Quadrant::SouthEast),
            other => Err(TerrainError::InvalidQuadrant(other)),
        }
    }
}

/// The identifier of a tile, given by the path of quadrants leading from the root to it.
///
/// The key of length `n` addresses exactly one tile at level `n` and is a prefix of the keys
/// of all of its descendants.
#[derive(Clone, Default, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct QuadKey {
    path: Vec<Quadrant>,
}

impl QuadKey {
    pub fn root() -> Self {
        Self { path: Vec::new() }
    }

    pub fn from_quadrants(path: Vec<Quadrant>) -> Self {
        Self { path }
    }

    /// Appends one quadrant, failing for anything outside of `1..=4`.
    pub fn child(&self, quadrant: u8) -> TerrainResult<Self> {
        Ok(self.child_quadrant(Quadrant::try_from(quadrant)?))
    }

    pub fn child_quadrant(&self, quadrant: Quadrant) -> Self {
        let mut path = Vec::with_capacity(self.path.len() + 1);
        path.extend_from_slice(&self.path);
        path.push(quadrant);

        Self { path }
    }

    pub fn children(&self) -> impl Iterator<Item = Self> + '_ {
        Quadrant::ALL
            .into_iter()
            .map(move |quadrant| self.child_quadrant(quadrant))
    }

    pub fn parent(&self) -> Option<Self> {
        let (_, path) = self.path.split_last()?;

        Some(Self {
            path: path.to_vec(),
        })
    }

    #[inline]
    pub fn level(&self) -> u32 {
        self.path.len() as u32
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }

    /// The last quadrant of the path, or `0` for the root.
    pub fn quadrant(&self) -> u8 {
        self.path.last().map_or(0, |&quadrant| quadrant as u8)
    }

    pub fn last_quadrant(&self) -> Option<Quadrant> {
        self.path.last().copied()
    }

    /// The quadrant chosen when descending from `level` to `level + 1`.
    pub fn path_at(&self, level: u32) -> Option<Quadrant> {
        self.path.get(level as usize).copied()
    }

    pub fn path(&self) -> &[Quadrant] {
        &self.path
    }

    pub fn starts_with(&self, other: &QuadKey) -> bool {
        self.path.starts_with(&other.path)
    }

    /// Maps the sample column `x` of this tile to the corresponding column of its ancestor at `level`.
    pub fn find_x_at_level(&self, x: u32, level: u32, tile_width: u32) -> Option<u32> {
        self.find_at_level(x, level, tile_width, Quadrant::is_east)
    }

    /// Maps the sample row `y` of this tile to the corresponding row of its ancestor at `level`.
    pub fn find_y_at_level(&self, y: u32, level: u32, tile_length: u32) -> Option<u32> {
        self.find_at_level(y, level, tile_length, Quadrant::is_south)
    }

    fn find_at_level(
        &self,
        mut value: u32,
        level: u32,
        tile_size: u32,
        second_half: fn(Quadrant) -> bool,
    ) -> Option<u32> {
        if level > self.level() {
            return None;
        }

        for &quadrant in self.path[level as usize..].iter().rev() {
            value /= 2;

            if second_half(quadrant) {
                value += tile_size / 2;
            }
        }

        Some(value)
    }

    /// The center of the tile relative to the center of the terrain.
    pub fn tile_center(&self, terrain_width: f64, terrain_length: f64) -> DVec3 {
        let mut center = DVec3::ZERO;
        let mut width = terrain_width / 2.0;
        let mut length = terrain_length / 2.0;

        for &quadrant in &self.path {
            width /= 2.0;
            length /= 2.0;

            center += match quadrant {
                Quadrant::NorthWest => DVec3::new(-width, length, 0.0),
                Quadrant::NorthEast => DVec3::new(width, length, 0.0),
                Quadrant::SouthWest => DVec3::new(-width, -length, 0.0),
                Quadrant::SouthEast => DVec3::new(width, -length, 0.0),
            };
        }

        center
    }

    /// The path of the tile file below the layer directory, e.g. `<layer>/1/4/0.png`.
    pub fn tile_path(&self, layer_path: &str, extension: &str) -> String {
        format!("{layer_path}{self}/0.{extension}")
    }
}

impl fmt::Display for QuadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        for &quadrant in &self.path {
            write!(f, "/{}", quadrant as u8)?;
        }

        Ok(())
    }
}

impl FromStr for QuadKey {
    type Err = TerrainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Self::root());
        }

        let Some(path) = s.strip_prefix('/') else {
            return Err(TerrainError::InvalidQuadKey(s.to_string()));
        };

        let path = path
            .split('/')
            .map(|token| Quadrant::try_from(token.trim().parse::<u8>()?))
            .collect::<TerrainResult<Vec<_>>>()?;

        Ok(Self { path })
    }
}
