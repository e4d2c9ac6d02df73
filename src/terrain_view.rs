use crate::{math::QuadKey, terrain_data::tile_factory::TerrainTile};
use bevy::math::DVec3;
use std::sync::Arc;

/// The camera the level of detail of a landscape is selected for.
///
/// All positions are relative to the center of the landscape.
pub trait ViewPoint {
    fn location(&self) -> DVec3;

    /// The point on the landscape the view is centered on, if known.
    fn look_at(&self) -> Option<DVec3> {
        None
    }

    /// The size of one screen pixel at the given distance from the view point.
    fn pixel_size_at(&self, distance: f64) -> f64;

    /// Whether the bounding box is outside of the view.
    fn is_culled(&self, _min: DVec3, _max: DVec3) -> bool {
        false
    }
}

/// A perspective camera with a vertical field of view.
#[derive(Clone, Debug, PartialEq)]
pub struct PerspectiveView {
    pub location: DVec3,
    pub look_at: Option<DVec3>,
    /// The vertical field of view in radians.
    pub fov: f64,
    /// The height of the viewport in pixels.
    pub viewport_height: f64,
}

impl PerspectiveView {
    pub fn new(location: DVec3, fov: f64, viewport_height: f64) -> Self {
        Self {
            location,
            look_at: None,
            fov,
            viewport_height,
        }
    }

    pub fn looking_at(mut self, look_at: DVec3) -> Self {
        self.look_at = Some(look_at);
        self
    }
}

impl ViewPoint for PerspectiveView {
    fn location(&self) -> DVec3 {
        self.location
    }

    fn look_at(&self) -> Option<DVec3> {
        self.look_at
    }

    fn pixel_size_at(&self, distance: f64) -> f64 {
        if self.viewport_height <= 0.0 {
            return 0.0;
        }

        2.0 * distance * (self.fov / 2.0).tan() / self.viewport_height
    }
}

/// A change of the meshes shown by the scene graph.
///
/// The quadtree publishes these events, the owner of the scene graph applies them on its own
/// thread.
#[derive(Clone, Debug)]
pub enum RenderEvent {
    /// The tile became a leaf of the quadtree and should be shown.
    Attach { key: QuadKey, tile: Arc<TerrainTile> },
    /// The tile was split or merged away and should be hidden.
    Detach { key: QuadKey },
    /// The edges of the mesh were stitched to a neighbor and need to be uploaded again.
    MeshChanged { key: QuadKey },
    /// The textures of the tile to bind changed.
    TexturesChanged { key: QuadKey },
}

impl RenderEvent {
    pub fn key(&self) -> &QuadKey {
        match self {
            RenderEvent::Attach { key, .. }
            | RenderEvent::Detach { key }
            | RenderEvent::MeshChanged { key }
            | RenderEvent::TexturesChanged { key } => key,
        }
    }
}
