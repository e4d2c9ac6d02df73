//! The level of detail structure of a landscape.
//!
//! # Explanation
//! The landscape is shown as the leaves of a quadtree of [`TerrainTile`]s. Every update, each
//! node compares the size of its pixels with the size of a screen pixel at its distance to the
//! view point. Nodes whose pixels appear too large are split into their four children, nodes
//! whose pixels appear small enough are merged back into a single leaf.
//!
//! Adjacent leaves may differ in resolution, so their shared edges are stitched together after
//! every change (see [`QuadTree::stitch`]). Changes of the visible meshes are published as
//! [`RenderEvent`]s.

mod stitch;

pub use crate::terrain_data::tile_mesh::Side;

use crate::{
    math::QuadKey,
    result::{TerrainError, TerrainResult},
    terrain_data::tile_factory::{TerrainTile, TileFactory},
    terrain_view::{RenderEvent, ViewPoint},
};
use async_channel::Sender;
use bevy::{
    log::debug,
    math::{DVec3, Vec3},
};
use slab::Slab;
use std::sync::Arc;

pub type NodeId = usize;

bitflags::bitflags! {
    /// The sides of a node whose edge has to be stitched again.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub(crate) struct DirtySides: u8 {
        const LEFT = 1 << 0;
        const RIGHT = 1 << 1;
        const BOTTOM = 1 << 2;
        const TOP = 1 << 3;
    }
}

impl From<Side> for DirtySides {
    fn from(side: Side) -> Self {
        Self::from_bits_truncate(1 << side.index())
    }
}

/// A node of the [`QuadTree`], holding the tile of its key.
#[derive(Debug)]
pub struct QuadNode {
    tile: Arc<TerrainTile>,
    parent: Option<NodeId>,
    children: Option<[NodeId; 4]>,
    neighbors: [Option<NodeId>; 4],
    dirty: DirtySides,
    /// Whether the tile has no children in storage.
    highest_level: bool,
    /// The corners from the lower left in counter clockwise order.
    corners: [DVec3; 4],
    center: DVec3,
    min_z: f64,
    max_z: f64,
}

impl QuadNode {
    fn new(tile: Arc<TerrainTile>, parent: Option<NodeId>, base_z: f64) -> Self {
        let width = tile.pixel_width * tile.mesh().tile_width() as f64 / 2.0;
        let length = tile.pixel_length * tile.mesh().tile_length() as f64 / 2.0;
        let center = tile.center;

        let mut corners = [
            DVec3::new(center.x - width, center.y - length, 0.0),
            DVec3::new(center.x + width, center.y - length, 0.0),
            DVec3::new(center.x + width, center.y + length, 0.0),
            DVec3::new(center.x - width, center.y + length, 0.0),
        ];
        let mut center = DVec3::new(center.x, center.y, 0.0);

        let (min_z, max_z) = {
            let mesh = tile.mesh();
            let (tw, tl) = (mesh.tile_width(), mesh.tile_length());

            if mesh.is_empty() {
                let z = mesh.elevation(0, 0) as f64;
                corners.iter_mut().for_each(|corner| corner.z = z);
                center.z = z;
                (z, z)
            } else {
                let z = |c, r| mesh.elevation(c, r) as f64 - base_z;

                corners[0].z = z(0, tl);
                corners[1].z = z(tw, tl);
                corners[2].z = z(tw, 0);
                corners[3].z = z(0, 0);
                center.z = z(tw / 2, tl / 2);

                let (min, max) = mesh.elevation_range();
                (min as f64 - base_z, max as f64 - base_z)
            }
        };

        Self {
            tile,
            parent,
            children: None,
            neighbors: [None; 4],
            dirty: DirtySides::empty(),
            highest_level: false,
            corners,
            center,
            min_z,
            max_z,
        }
    }

    pub fn key(&self) -> &QuadKey {
        &self.tile.key
    }

    pub fn tile(&self) -> &Arc<TerrainTile> {
        &self.tile
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> Option<[NodeId; 4]> {
        self.children
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    pub fn neighbor(&self, side: Side) -> Option<NodeId> {
        self.neighbors[side.index()]
    }

    pub fn is_dirty(&self, side: Side) -> bool {
        self.dirty.contains(side.into())
    }

    pub fn corners(&self) -> &[DVec3; 4] {
        &self.corners
    }

    pub fn center(&self) -> DVec3 {
        self.center
    }

    /// The bounding box of the node, relative to the center of the landscape.
    pub fn bounds(&self) -> (DVec3, DVec3) {
        (
            DVec3::new(self.corners[0].x, self.corners[0].y, self.min_z),
            DVec3::new(self.corners[2].x, self.corners[2].y, self.max_z),
        )
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.corners[0].x
            && x <= self.corners[2].x
            && y >= self.corners[0].y
            && y <= self.corners[2].y
    }

    fn set_neighbors(&mut self, neighbors: [Option<NodeId>; 4]) {
        self.neighbors = neighbors;
        self.reset_dirty();
    }

    /// Marks every side with a neighbor for stitching.
    fn reset_dirty(&mut self) {
        self.dirty = Side::ALL
            .into_iter()
            .filter(|side| self.neighbors[side.index()].is_some())
            .map(DirtySides::from)
            .collect();
    }

    /// The distance of the closest test point to the view point.
    fn distance(&self, view: &impl ViewPoint) -> f64 {
        let location = view.location();

        let look_at = view
            .look_at()
            .filter(|look_at| self.contains(look_at.x, look_at.y))
            .map_or(f64::MAX, |look_at| location.distance(look_at));

        self.corners
            .iter()
            .chain([&self.center])
            .map(|point| location.distance(*point))
            .fold(look_at, f64::min)
    }
}

/// The size of the quadtree.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TreeStats {
    pub nodes: usize,
    pub leaves: usize,
    pub depth: u32,
    /// The estimated memory of the tiles of all nodes.
    pub bytes: usize,
}

/// The live level of detail structure of a landscape.
pub struct QuadTree {
    nodes: Slab<QuadNode>,
    root: NodeId,
    /// The minimum number of screen pixels covered by one mesh cell.
    cell_size: f64,
    /// The elevation subtracted from the test points of nodes.
    base_z: f64,
    events: Sender<RenderEvent>,
}

impl QuadTree {
    /// Creates a tree holding only the root tile, which is loaded on the calling thread.
    pub fn new(
        factory: &TileFactory,
        cell_size: f64,
        events: Sender<RenderEvent>,
    ) -> TerrainResult<Self> {
        let tile = factory
            .get_root()
            .ok_or(TerrainError::TileNotFound(QuadKey::root()))?;

        let base_z = factory.min_z() * factory.pixel_scale();
        let mut nodes = Slab::with_capacity(64);
        let root = nodes.insert(QuadNode::new(tile.clone(), None, base_z));

        let tree = Self {
            nodes,
            root,
            cell_size,
            base_z,
            events,
        };
        tree.publish(RenderEvent::Attach {
            key: QuadKey::root(),
            tile,
        });

        Ok(tree)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&QuadNode> {
        self.nodes.get(id)
    }

    pub fn root_node(&self) -> &QuadNode {
        &self.nodes[self.root]
    }

    /// Finds the node of a key, if it is part of the tree.
    pub fn find(&self, key: &QuadKey) -> Option<NodeId> {
        key.path().iter().try_fold(self.root, |id, quadrant| {
            self.nodes[id]
                .children
                .map(|children| children[quadrant.index()])
        })
    }

    /// The nodes whose meshes are currently shown.
    pub fn leaves(&self) -> Vec<NodeId> {
        let mut leaves = Vec::new();
        let mut stack = vec![self.root];

        while let Some(id) = stack.pop() {
            match self.nodes[id].children {
                Some(children) => stack.extend(children.iter().rev()),
                None => leaves.push(id),
            }
        }

        leaves
    }

    pub fn stats(&self) -> TreeStats {
        self.nodes
            .iter()
            .fold(TreeStats::default(), |mut stats, (_, node)| {
                stats.nodes += 1;
                stats.leaves += node.is_leaf() as usize;
                stats.depth = stats.depth.max(node.key().level());
                stats.bytes += node.tile.cost;
                stats
            })
    }

    /// Tells the scene graph to rebind the textures of all shown tiles.
    pub fn textures_changed(&self) {
        for id in self.leaves() {
            self.publish(RenderEvent::TexturesChanged {
                key: self.nodes[id].key().clone(),
            });
        }
    }

    fn publish(&self, event: RenderEvent) {
        // nobody may be listening
        let _ = self.events.try_send(event);
    }

    /// Splits and merges nodes for the view point, returns whether the tree changed.
    ///
    /// Children are requested in the background unless `wait` is set, in which case they are
    /// loaded on the calling thread. Nodes split by this call are only refined further by the
    /// next update.
    pub fn update(&mut self, factory: &TileFactory, view: &impl ViewPoint, wait: bool) -> bool {
        self.update_node(self.root, factory, view, wait)
    }

    fn update_node(
        &mut self,
        id: NodeId,
        factory: &TileFactory,
        view: &impl ViewPoint,
        wait: bool,
    ) -> bool {
        let node = &self.nodes[id];
        let (min, max) = node.bounds();
        let culled = view.is_culled(min, max);

        let pixel_size = view.pixel_size_at(node.distance(view));
        if pixel_size <= 0.0 {
            return false;
        }

        // mesh cells should cover more than a single screen pixel
        let pixel_size = pixel_size * self.cell_size;
        let pixel_width = node.tile.pixel_width;
        let children = node.children;

        match children {
            Some(_) if pixel_size >= pixel_width || culled => self.merge(id),
            None if pixel_size >= pixel_width || culled => false,
            None if pixel_size <= pixel_width / 2.0 => self.split(id, factory, wait),
            None => false,
            Some(children) => children.iter().fold(false, |changed, &child| {
                self.update_node(child, factory, view, wait) | changed
            }),
        }
    }

    fn split(&mut self, id: NodeId, factory: &TileFactory, wait: bool) -> bool {
        let node = &mut self.nodes[id];

        if node.highest_level {
            return false;
        }

        node.highest_level = !factory.children_exist(node.key());
        if node.highest_level {
            return false;
        }

        let key = node.key().clone();
        let (pixel_width, pixel_length) = (node.tile.pixel_width, node.tile.pixel_length);

        match factory.get_children(&key, pixel_width, pixel_length, wait) {
            Some(tiles) => {
                self.set_children(id, tiles);
                true
            }
            None => false,
        }
    }

    fn set_children(&mut self, id: NodeId, tiles: [Arc<TerrainTile>; 4]) {
        let children = tiles.map(|tile| {
            self.publish(RenderEvent::Attach {
                key: tile.key.clone(),
                tile: tile.clone(),
            });
            self.nodes
                .insert(QuadNode::new(tile, Some(id), self.base_z))
        });
        let [c1, c2, c3, c4] = children;

        let parent = &mut self.nodes[id];
        let [left, right, bottom, top] = parent.neighbors;
        let key = parent.key().clone();
        parent.children = Some(children);
        parent.dirty = DirtySides::empty();

        debug!("Split {key}.");
        self.publish(RenderEvent::Detach { key });

        self.nodes[c1].set_neighbors([left, Some(c2), Some(c3), top]);
        self.nodes[c2].set_neighbors([Some(c1), right, Some(c4), top]);
        self.nodes[c3].set_neighbors([left, Some(c4), bottom, Some(c1)]);
        self.nodes[c4].set_neighbors([Some(c3), right, bottom, Some(c2)]);
    }

    /// Drops the descendants of a node and shows its own mesh again.
    fn merge(&mut self, id: NodeId) -> bool {
        let Some(children) = self.nodes[id].children.take() else {
            return false;
        };

        for child in children {
            self.remove_subtree(child);
        }

        let node = &mut self.nodes[id];
        node.reset_dirty();
        let (key, tile) = (node.key().clone(), node.tile.clone());

        debug!("Merged {key}.");
        self.publish(RenderEvent::Attach { key, tile });

        true
    }

    fn remove_subtree(&mut self, id: NodeId) {
        let node = self.nodes.remove(id);

        match node.children {
            Some(children) => children
                .into_iter()
                .for_each(|child| self.remove_subtree(child)),
            None => self.publish(RenderEvent::Detach {
                key: node.key().clone(),
            }),
        }
    }

    /// Whether any leaf still has a side waiting to be stitched.
    pub fn is_dirty(&self) -> bool {
        self.leaves()
            .into_iter()
            .any(|id| !self.nodes[id].dirty.is_empty())
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.root_node().contains(x, y)
    }

    /// The leaf containing the point.
    pub fn leaf_at(&self, x: f64, y: f64) -> Option<&QuadNode> {
        let mut node = self.root_node();

        if !node.contains(x, y) {
            return None;
        }

        while let Some(children) = node.children {
            node = children
                .iter()
                .map(|&child| &self.nodes[child])
                .find(|child| child.contains(x, y))?;
        }

        Some(node)
    }

    /// The bilinear interpolated elevation at a point, NaN outside of the landscape.
    pub fn elevation(&self, x: f64, y: f64) -> f32 {
        self.leaf_at(x, y).map_or(f32::NAN, |leaf| {
            leaf.tile
                .mesh()
                .elevation_bilinear(x - leaf.corners[0].x, y - leaf.corners[0].y)
        })
    }

    /// The elevation of the sample closest to a point, NaN outside of the landscape.
    pub fn elevation_nearest(&self, x: f64, y: f64) -> f32 {
        self.leaf_at(x, y).map_or(f32::NAN, |leaf| {
            leaf.tile
                .mesh()
                .elevation_nearest(x - leaf.corners[0].x, y - leaf.corners[0].y)
        })
    }

    /// The normal of the sample at the lower left of the cell containing a point.
    pub fn normal(&self, x: f64, y: f64) -> Option<Vec3> {
        let leaf = self.leaf_at(x, y)?;
        let mesh = leaf.tile.mesh();

        let column = ((x - leaf.corners[0].x) / leaf.tile.pixel_width).floor() as usize;
        let row = ((y - leaf.corners[0].y) / leaf.tile.pixel_length).floor() as usize;

        mesh.normal(
            column.min(mesh.tile_width()),
            mesh.tile_length() - row.min(mesh.tile_length()),
        )
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        config::StreamingConfig,
        terrain_data::{
            raster_layer::RasterLayer,
            tile_source::{tests::write_landscape, FileSystemTileSource, TileSource},
            LayerInfo, LayerType,
        },
    };
    use async_channel::Receiver;
    use std::{path::Path, str::FromStr};

    /// A view point whose pixel size does not depend on the distance.
    pub(crate) struct FixedView(pub f64);

    impl ViewPoint for FixedView {
        fn location(&self) -> DVec3 {
            DVec3::new(0.0, 0.0, 100.0)
        }

        fn pixel_size_at(&self, _distance: f64) -> f64 {
            self.0
        }
    }

    pub(crate) fn factory(dir: &Path) -> TileFactory {
        let source = FileSystemTileSource::connect(dir).unwrap();
        source.layer_info().unwrap();

        let base_layer = RasterLayer::from_properties(
            LayerInfo::new("elevation", LayerType::Elevation),
            &source.properties("elevation").unwrap(),
        )
        .unwrap();

        TileFactory::new(
            Arc::new(source),
            base_layer,
            vec![None],
            &StreamingConfig::default(),
        )
    }

    fn tree(factory: &TileFactory) -> (QuadTree, Receiver<RenderEvent>) {
        let (sender, receiver) = async_channel::unbounded();
        let tree = QuadTree::new(factory, 4.0, sender).unwrap();
        (tree, receiver)
    }

    fn key(key: &str) -> QuadKey {
        QuadKey::from_str(key).unwrap()
    }

    fn drain(receiver: &Receiver<RenderEvent>) -> Vec<RenderEvent> {
        std::iter::from_fn(|| receiver.try_recv().ok()).collect()
    }

    #[test]
    fn splits_and_merges() {
        let dir = tempfile::tempdir().unwrap();
        write_landscape(dir.path(), 3, 5, 7.0);
        let factory = factory(dir.path());
        let (mut tree, events) = tree(&factory);

        assert!(matches!(
            drain(&events)[..],
            [RenderEvent::Attach { .. }]
        ));

        // pixels of 0.4 are smaller than half of the pixels of every level
        let near = FixedView(0.1);
        assert!(tree.update(&factory, &near, true));
        assert_eq!(tree.stats().leaves, 4);
        assert!(tree.update(&factory, &near, true));
        assert_eq!(tree.stats().leaves, 16);
        assert!(!tree.update(&factory, &near, true));

        let stats = tree.stats();
        assert_eq!(stats.nodes, 21);
        assert_eq!(stats.depth, 2);
        assert_eq!(stats.bytes, 21 * factory.bytes_per_tile());

        let events = drain(&events);
        let attached = events
            .iter()
            .filter(|event| matches!(event, RenderEvent::Attach { .. }))
            .count();
        let detached = events
            .iter()
            .filter(|event| matches!(event, RenderEvent::Detach { .. }))
            .count();
        assert_eq!((attached, detached), (20, 5));

        assert!(tree.find(&key("/4/2")).is_some());
        assert!(tree.find(&key("/4/2/1")).is_none());

        // pixels of 40 are larger than the root pixels
        assert!(tree.update(&factory, &FixedView(10.0), true));
        assert_eq!(tree.stats().nodes, 1);
        assert!(tree.root_node().is_leaf());
    }

    #[test]
    fn splits_wait_for_background_loads() {
        let dir = tempfile::tempdir().unwrap();
        write_landscape(dir.path(), 2, 5, 7.0);
        let factory = factory(dir.path());
        let (mut tree, _events) = tree(&factory);

        assert!(!tree.update(&factory, &FixedView(0.1), false));
        while factory.loader().wait_next().is_some() {}

        assert!(tree.update(&factory, &FixedView(0.1), false));
        assert_eq!(tree.stats().leaves, 4);

        // the highest level is never split
        assert!(!tree.update(&factory, &FixedView(0.1), false));
        assert_eq!(factory.loader().in_flight(), 0);
    }

    #[test]
    fn children_know_their_neighbors() {
        let dir = tempfile::tempdir().unwrap();
        write_landscape(dir.path(), 3, 5, 7.0);
        let factory = factory(dir.path());
        let (mut tree, _events) = tree(&factory);

        assert!(tree.split(tree.root(), &factory, true));
        let north_west = tree.find(&key("/1")).unwrap();
        assert!(tree.split(north_west, &factory, true));

        let node = |name: &str| &tree.nodes[tree.find(&key(name)).unwrap()];
        let id = |name: &str| tree.find(&key(name));

        let north_east = node("/1/2");
        assert_eq!(north_east.neighbor(Side::Left), id("/1/1"));
        assert_eq!(north_east.neighbor(Side::Right), id("/2"));
        assert_eq!(north_east.neighbor(Side::Bottom), id("/1/4"));
        assert_eq!(north_east.neighbor(Side::Top), None);
        assert!(north_east.is_dirty(Side::Right));
        assert!(!north_east.is_dirty(Side::Top));

        let south_east = node("/1/4");
        assert_eq!(south_east.neighbor(Side::Bottom), id("/3"));
        assert_eq!(south_east.neighbor(Side::Right), id("/2"));

        assert!(tree.is_dirty());
        tree.stitch();
        assert!(!tree.is_dirty());
    }

    #[test]
    fn queries_follow_the_leaves() {
        let dir = tempfile::tempdir().unwrap();
        write_landscape(dir.path(), 2, 5, 7.0);
        let factory = factory(dir.path());
        let (mut tree, _events) = tree(&factory);

        // the terrain spans 8 by 8 meters around the origin
        assert!(tree.contains(-4.0, 4.0));
        assert!(!tree.contains(4.5, 0.0));
        assert!(tree.elevation(5.0, 0.0).is_nan());

        assert_eq!(tree.elevation(1.3, -2.7), 7.0);
        assert_eq!(tree.elevation_nearest(-3.9, 3.9), 7.0);
        assert_eq!(tree.normal(0.5, 0.5), Some(Vec3::Z));

        tree.update(&factory, &FixedView(0.1), true);
        let leaf = tree.leaf_at(-1.0, -1.0).unwrap();
        assert_eq!(leaf.key(), &key("/3"));
        assert_eq!(leaf.corners()[0], DVec3::new(-4.0, -4.0, 0.0));
        assert_eq!(leaf.center(), DVec3::new(-2.0, -2.0, 0.0));
        assert_eq!(tree.elevation(-1.0, -1.0), 7.0);
    }
}
