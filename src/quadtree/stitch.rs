use super::{DirtySides, NodeId, QuadTree, Side};
use crate::{math::QuadKey, terrain_view::RenderEvent};
use std::{cmp::Ordering, cmp::Reverse, collections::BTreeSet};

/// Two adjacent leaves whose shared edge needs to be stitched.
struct StitchJob {
    node: NodeId,
    side: Side,
    neighbor: NodeId,
    /// Shared edges of the same level first, then the edges along the finest coarser tiles.
    order: (bool, Reverse<u32>),
}

impl QuadTree {
    /// Stitches the dirty sides of all leaves to their neighbors.
    ///
    /// Leaves of the same level restore their original edges, which already match. A finer
    /// leaf is snapped onto the edge of its coarser neighbor: every n-th vertex is copied and
    /// the vertices in between are interpolated. Shared edges are restored before any finer
    /// edge is snapped, so that corners lying on a coarser edge keep the snapped elevation.
    pub fn stitch(&mut self) {
        let mut jobs = Vec::new();

        for leaf in self.leaves() {
            for side in Side::ALL {
                let node = &self.nodes[leaf];

                if let (true, Some(neighbor)) = (node.is_dirty(side), node.neighbor(side)) {
                    self.collect_jobs(leaf, side, neighbor, &mut jobs);
                }
            }
        }

        jobs.sort_by_key(|job| job.order);

        let mut changed = BTreeSet::new();
        for job in jobs {
            self.do_stitch(&job);
            changed.extend([job.node, job.neighbor]);
        }

        for id in changed {
            self.publish(RenderEvent::MeshChanged {
                key: self.nodes[id].key().clone(),
            });
        }
    }

    fn is_empty(&self, id: NodeId) -> bool {
        self.nodes[id].tile.mesh().is_empty()
    }

    fn collect_jobs(&mut self, id: NodeId, side: Side, neighbor: NodeId, jobs: &mut Vec<StitchJob>) {
        if self.is_empty(id) {
            self.nodes[id].dirty = DirtySides::empty();
            return;
        }

        if self.is_empty(neighbor) {
            self.nodes[neighbor].dirty = DirtySides::empty();
            self.nodes[id].dirty.remove(side.into());
            return;
        }

        let key = self.nodes[id].key().clone();
        let mut adjacent = Vec::new();
        self.neighbors_along(side, neighbor, &key, &mut adjacent);

        for that in adjacent {
            if self.is_empty(that) {
                self.nodes[that].dirty = DirtySides::empty();
                continue;
            }

            let level = key.level();
            let that_level = self.nodes[that].key().level();

            // the opposite side of a finer or equal neighbor is covered by this job
            if that_level >= level {
                self.nodes[that].dirty.remove(side.opposite().into());
            }

            jobs.push(StitchJob {
                node: id,
                side,
                neighbor: that,
                order: (level != that_level, Reverse(level.min(that_level))),
            });
        }

        self.nodes[id].dirty.remove(side.into());
    }

    /// Collects the leaves below `neighbor` which touch the side of the node with the given key.
    fn neighbors_along(
        &self,
        side: Side,
        neighbor: NodeId,
        key: &QuadKey,
        leaves: &mut Vec<NodeId>,
    ) {
        let node = &self.nodes[neighbor];

        let Some(children) = node.children else {
            leaves.push(neighbor);
            return;
        };

        let level = node.key().level();

        if level >= key.level() {
            let adjacent = match side {
                Side::Left => [1, 3],
                Side::Right => [0, 2],
                Side::Bottom => [0, 1],
                Side::Top => [2, 3],
            };

            for child in adjacent {
                self.neighbors_along(side, children[child], key, leaves);
            }
        } else if let Some(quadrant) = key.path_at(level) {
            // the child of the neighbor mirrored across the shared edge
            let mirrored = match side {
                Side::Left | Side::Right => [1, 0, 3, 2],
                Side::Bottom | Side::Top => [2, 3, 0, 1],
            };

            self.neighbors_along(side, children[mirrored[quadrant.index()]], key, leaves);
        }
    }

    fn do_stitch(&mut self, job: &StitchJob) {
        let this = self.nodes[job.node].tile.clone();
        let that = self.nodes[job.neighbor].tile.clone();

        let mut this_mesh = this.mesh_mut();
        let mut that_mesh = that.mesh_mut();

        let level = this.key.level();
        let that_level = that.key.level();
        let side = job.side;

        match level.cmp(&that_level) {
            Ordering::Equal => {
                this_mesh.restore_edge(side);
                that_mesh.restore_edge(side.opposite());
            }
            Ordering::Greater => {
                let tile_size = (this_mesh.tile_width(), this_mesh.tile_length());

                if let Some(ends) = stitch_ends(&this.key, side, that_level, tile_size) {
                    this_mesh.fill_edge(side, ends, &mut that_mesh);
                }
            }
            Ordering::Less => {
                let side = side.opposite();
                let tile_size = (that_mesh.tile_width(), that_mesh.tile_length());

                if let Some(ends) = stitch_ends(&that.key, side, level, tile_size) {
                    that_mesh.fill_edge(side, ends, &mut this_mesh);
                }
            }
        }
    }
}

/// The range of samples along the opposite edge of a coarser neighbor at `level`, which the
/// side of the tile spans.
fn stitch_ends(
    key: &QuadKey,
    side: Side,
    level: u32,
    (tile_width, tile_length): (usize, usize),
) -> Option<[u32; 2]> {
    let (find, size): (fn(&QuadKey, u32, u32, u32) -> Option<u32>, u32) = match side {
        Side::Left | Side::Right => (QuadKey::find_y_at_level, tile_length as u32),
        Side::Bottom | Side::Top => (QuadKey::find_x_at_level, tile_width as u32),
    };

    Some([find(key, 0, level, size)?, find(key, size, level, size)?])
}
