use crate::{
    math::{QuadKey, Quadrant},
    result::{TerrainError, TerrainResult},
};
use bevy::{
    log::info,
    math::DVec2,
    utils::{HashMap, HashSet},
};
use itertools::Itertools;
use std::{fmt::Write, fs, path::Path};

const HEADER: &str = "Index,Id,Child1,Child2,Child3,Child4";
const NO_CHILD: i64 = -1;

/// Index of the tiles that exist in storage.
///
/// Quad subdivisions are always complete, so every node has either four children or none.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DepthTree {
    pub key: QuadKey,
    pub children: Option<Box<[DepthTree; 4]>>,
}

impl DepthTree {
    pub fn leaf(key: QuadKey) -> Self {
        Self {
            key,
            children: None,
        }
    }

    /// Builds the tree by probing storage, starting at the root.
    ///
    /// When the first child of a tile exists, its three siblings are assumed to exist as well.
    pub fn build(exists: &impl Fn(&QuadKey) -> bool) -> Self {
        let mut tree = Self::leaf(QuadKey::root());
        tree.fill(exists);
        tree
    }

    fn fill(&mut self, exists: &impl Fn(&QuadKey) -> bool) {
        if !exists(&self.key.child_quadrant(Quadrant::NorthWest)) {
            return;
        }

        let mut children = Box::new(Quadrant::ALL.map(|quadrant| {
            DepthTree::leaf(self.key.child_quadrant(quadrant))
        }));

        for child in children.iter_mut() {
            child.fill(exists);
        }

        self.children = Some(children);
    }

    pub fn child(&self, quadrant: Quadrant) -> Option<&DepthTree> {
        self.children
            .as_ref()
            .map(|children| &children[quadrant.index()])
    }

    /// Whether the tile with the given key exists, walking down the prefix of the key.
    pub fn contains(&self, key: &QuadKey) -> bool {
        if !key.starts_with(&self.key) {
            return false;
        }

        match key.path_at(self.key.level()) {
            None => true,
            Some(quadrant) => self
                .child(quadrant)
                .is_some_and(|child| child.contains(key)),
        }
    }

    pub fn node_count(&self) -> usize {
        1 + self.children.as_ref().map_or(0, |children| {
            children.iter().map(DepthTree::node_count).sum()
        })
    }

    /// The number of levels below this node.
    pub fn depth(&self) -> u32 {
        self.children.as_ref().map_or(0, |children| {
            1 + children.iter().map(DepthTree::depth).max().unwrap_or(0)
        })
    }

    /// Finds the deepest existing tile containing the point `(x, y)`, given relative to the
    /// center of the terrain.
    ///
    /// The search stops early once `max_level` levels have been descended.
    pub fn locate_best(
        &self,
        x: f64,
        y: f64,
        terrain_width: f64,
        terrain_length: f64,
        max_level: Option<u32>,
    ) -> QuadKey {
        let (key, _) = self.descend(x, y, terrain_width, terrain_length, max_level);
        key
    }

    /// Finds the tile at exactly `max_level` containing the point `(x, y)`.
    ///
    /// Returns `None`, if the existing tiles do not reach this level at that point.
    pub fn locate_exact(
        &self,
        x: f64,
        y: f64,
        terrain_width: f64,
        terrain_length: f64,
        max_level: u32,
    ) -> Option<QuadKey> {
        let (key, reached) = self.descend(x, y, terrain_width, terrain_length, Some(max_level));
        reached.then_some(key)
    }

    fn descend(
        &self,
        x: f64,
        y: f64,
        terrain_width: f64,
        terrain_length: f64,
        max_level: Option<u32>,
    ) -> (QuadKey, bool) {
        let mut position = DVec2::new(x, y);
        let mut extent = DVec2::new(terrain_width, terrain_length) / 2.0;
        let mut node = self;
        let mut path = Vec::new();

        loop {
            if max_level.is_some_and(|max_level| path.len() as u32 >= max_level) {
                return (QuadKey::from_quadrants(path), true);
            }

            let Some(children) = &node.children else {
                return (QuadKey::from_quadrants(path), max_level.is_none());
            };

            extent /= 2.0;

            let quadrant = match (position.x < 0.0, position.y >= 0.0) {
                (true, true) => Quadrant::NorthWest,
                (false, true) => Quadrant::NorthEast,
                (true, false) => Quadrant::SouthWest,
                (false, false) => Quadrant::SouthEast,
            };

            position.x += if quadrant.is_east() { -extent.x } else { extent.x };
            position.y += if quadrant.is_south() { extent.y } else { -extent.y };

            node = &children[quadrant.index()];
            path.push(quadrant);
        }
    }

    /// Encodes the tree as a table with one record per node, written in breadth first order.
    pub fn encode_alloc(&self) -> String {
        let mut encoded = String::from(HEADER);
        encoded.push('\n');

        let mut nodes = vec![self];
        let mut index = 0;

        while let Some(&node) = nodes.get(index) {
            let children = match &node.children {
                None => [NO_CHILD; 4],
                Some(children) => {
                    let first = nodes.len() as i64;
                    nodes.extend(children.iter());
                    [first, first + 1, first + 2, first + 3]
                }
            };

            // writing into a String never fails
            let _ = writeln!(encoded, "{index},{},{}", node.key, children.iter().join(","));
            index += 1;
        }

        encoded
    }

    pub fn decode_alloc(encoded: &str) -> TerrainResult<Self> {
        let mut lines = encoded
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'));

        // header
        lines.next();

        let mut records = lines
            .map(|line| {
                let tokens = line.split(',').map(str::trim).collect_vec();

                if tokens.len() < 6 {
                    return Err(TerrainError::InvalidDepthTree("record with less than 6 fields"));
                }

                let index = tokens[0].parse::<usize>()?;
                let children = [
                    tokens[2].parse::<i64>()?,
                    tokens[3].parse::<i64>()?,
                    tokens[4].parse::<i64>()?,
                    tokens[5].parse::<i64>()?,
                ];

                Ok((index, tokens[1].to_string(), children))
            })
            .collect::<TerrainResult<Vec<_>>>()?;

        if records.is_empty() {
            return Err(TerrainError::InvalidDepthTree("empty table"));
        }

        let mut table = HashMap::with_capacity(records.len());

        for (index, key, children) in records {
            if table.insert(index, (key, children)).is_some() {
                return Err(TerrainError::InvalidDepthTree("duplicate index"));
            }
        }

        let mut visited = HashSet::with_capacity(table.len());
        Self::create_node(0, &table, &mut visited)
    }

    fn create_node(
        index: usize,
        table: &HashMap<usize, (String, [i64; 4])>,
        visited: &mut HashSet<usize>,
    ) -> TerrainResult<Self> {
        let Some((key, children)) = table.get(&index) else {
            return Err(TerrainError::InvalidDepthTree("missing node"));
        };

        if !visited.insert(index) {
            return Err(TerrainError::InvalidDepthTree("node referenced twice"));
        }

        let key = key.parse::<QuadKey>()?;

        let children = match children.iter().filter(|&&child| child >= 0).count() {
            0 => None,
            4 => {
                let [c1, c2, c3, c4] = children.map(|child| child as usize);

                Some(Box::new([
                    Self::create_node(c1, table, visited)?,
                    Self::create_node(c2, table, visited)?,
                    Self::create_node(c3, table, visited)?,
                    Self::create_node(c4, table, visited)?,
                ]))
            }
            _ => return Err(TerrainError::InvalidDepthTree("incomplete quad")),
        };

        Ok(Self { key, children })
    }

    pub fn load_file<P: AsRef<Path>>(path: P) -> TerrainResult<Self> {
        let encoded = fs::read_to_string(path)?;
        Self::decode_alloc(&encoded)
    }

    pub fn save_file<P: AsRef<Path>>(&self, path: P) -> TerrainResult<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let encoded = self.encode_alloc();
        fs::write(path, encoded)?;

        info!(
            "Saved {} depth tree records to {}.",
            self.node_count(),
            path.display()
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(path: &str) -> QuadKey {
        path.parse().unwrap()
    }

    /// Root split twice in the north west, once everywhere else.
    fn sample_tree() -> DepthTree {
        let existing: HashSet<QuadKey> = ["", "/1", "/2", "/3", "/4", "/1/1", "/1/2", "/1/3", "/1/4"]
            .into_iter()
            .map(key)
            .collect();

        DepthTree::build(&|key| existing.contains(key))
    }

    #[test]
    fn build_probes_first_child() {
        let tree = sample_tree();

        assert_eq!(tree.node_count(), 9);
        assert_eq!(tree.depth(), 2);
        assert!(tree.contains(&key("/1/4")));
        assert!(tree.contains(&key("/3")));
        assert!(!tree.contains(&key("/3/1")));
        assert!(!tree.contains(&key("/1/4/2")));
    }

    #[test]
    fn store_and_load() {
        let tree = sample_tree();
        let encoded = tree.encode_alloc();

        assert!(encoded.starts_with(HEADER));
        assert!(encoded.contains("0,,1,2,3,4"));
        assert!(encoded.contains("1,/1,5,6,7,8"));
        assert!(encoded.contains("5,/1/1,-1,-1,-1,-1"));

        assert_eq!(DepthTree::decode_alloc(&encoded).unwrap(), tree);

        let single = DepthTree::leaf(QuadKey::root());
        assert_eq!(DepthTree::decode_alloc(&single.encode_alloc()).unwrap(), single);
    }

    #[test]
    fn load_unordered_records() {
        let encoded = "Index,Id,Child1,Child2,Child3,Child4\n\
                       # comment\n\
                       3,/3,-1,-1,-1,-1\n\
                       0,,1,2,3,4\n\
                       2,/2,-1,-1,-1,-1\n\
                       1,/1,-1,-1,-1,-1\n\
                       4,/4,-1,-1,-1,-1\n";

        let tree = DepthTree::decode_alloc(encoded).unwrap();
        assert_eq!(tree.node_count(), 5);
        assert_eq!(tree.child(Quadrant::SouthWest).unwrap().key, key("/3"));
    }

    #[test]
    fn reject_invalid_tables() {
        assert!(DepthTree::decode_alloc(HEADER).is_err());
        assert!(DepthTree::decode_alloc("Index,Id\n0,,1,2\n").is_err());
        assert!(DepthTree::decode_alloc("Index,Id\n1,/1,-1,-1,-1,-1\n").is_err());
        assert!(DepthTree::decode_alloc("Index,Id\n0,,0,0,0,0\n").is_err());
    }

    #[test]
    fn reject_corrupt_indices() {
        let huge = format!("{HEADER}\n0,,-1,-1,-1,-1\n{},/1,-1,-1,-1,-1\n", usize::MAX);
        assert_eq!(DepthTree::decode_alloc(&huge).unwrap(), DepthTree::leaf(QuadKey::root()));

        let referenced = format!("{HEADER}\n0,,1,2,3,{}\n1,/1,-1,-1,-1,-1\n", i64::MAX);
        assert!(matches!(
            DepthTree::decode_alloc(&referenced),
            Err(TerrainError::InvalidDepthTree(_))
        ));

        let duplicate = format!("{HEADER}\n0,,-1,-1,-1,-1\n0,/1,-1,-1,-1,-1\n");
        assert!(matches!(
            DepthTree::decode_alloc(&duplicate),
            Err(TerrainError::InvalidDepthTree("duplicate index"))
        ));

        let out_of_range = format!("{HEADER}\n0,,1,2,3,9\n1,/1,-1,-1,-1,-1\n");
        assert!(DepthTree::decode_alloc(&out_of_range).is_err());
    }

    #[test]
    fn save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dert/depthtree.txt");
        let tree = sample_tree();

        tree.save_file(&path).unwrap();
        assert_eq!(DepthTree::load_file(&path).unwrap(), tree);
    }

    #[test]
    fn locate_descends_into_quadrants() {
        let tree = sample_tree();

        assert_eq!(tree.locate_best(-40.0, 40.0, 100.0, 100.0, Some(2)), key("/1/1"));
        assert_eq!(tree.locate_best(-10.0, 5.0, 100.0, 100.0, Some(2)), key("/1/4"));
        assert_eq!(tree.locate_best(-10.0, 5.0, 100.0, 100.0, Some(1)), key("/1"));
        assert_eq!(tree.locate_best(10.0, -5.0, 100.0, 100.0, None), key("/4"));
        assert_eq!(tree.locate_best(0.0, 0.0, 100.0, 100.0, None), key("/2"));
    }

    #[test]
    fn locate_exact_requires_level() {
        let tree = sample_tree();

        assert_eq!(tree.locate_exact(-40.0, 40.0, 100.0, 100.0, 2), Some(key("/1/1")));
        assert_eq!(tree.locate_exact(10.0, -5.0, 100.0, 100.0, 2), None);
        assert_eq!(tree.locate_best(10.0, -5.0, 100.0, 100.0, Some(2)), key("/4"));
    }
}
