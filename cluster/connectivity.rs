use crate::cluster::ClusterError;

/// Sparse undirected adjacency between features.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Connectivity {
    neighbors: Vec<Vec<usize>>,
}

impl Connectivity {
    /// Lattice adjacency of an `n_x × n_y × n_z` grid, voxels numbered in
    /// row-major order (`z` fastest). Each voxel is linked to its face
    /// neighbours.
    pub fn grid(n_x: usize, n_y: usize, n_z: usize) -> Self {
        let n_nodes = n_x * n_y * n_z;
        let index = |x: usize, y: usize, z: usize| (x * n_y + y) * n_z + z;
        let mut neighbors = vec![Vec::new(); n_nodes];
        for x in 0..n_x {
            for y in 0..n_y {
                for z in 0..n_z {
                    let here = index(x, y, z);
                    let mut link = |there: usize| {
                        neighbors[here].push(there);
                        neighbors[there].push(here);
                    };
                    if x + 1 < n_x {
                        link(index(x + 1, y, z));
                    }
                    if y + 1 < n_y {
                        link(index(x, y + 1, z));
                    }
                    if z + 1 < n_z {
                        link(index(x, y, z + 1));
                    }
                }
            }
        }
        for list in &mut neighbors {
            list.sort_unstable();
        }
        Self { neighbors }
    }

    /// Builds an adjacency from an undirected edge list. Self-loops and
    /// duplicate edges are dropped.
    pub fn from_edges(n_nodes: usize, edges: &[(usize, usize)]) -> Result<Self, ClusterError> {
        let mut neighbors = vec![Vec::new(); n_nodes];
        for &(a, b) in edges {
            if a >= n_nodes || b >= n_nodes {
                return Err(ClusterError::InvalidEdge { a, b, n_nodes });
            }
            if a != b {
                neighbors[a].push(b);
                neighbors[b].push(a);
            }
        }
        for list in &mut neighbors {
            list.sort_unstable();
            list.dedup();
        }
        Ok(Self { neighbors })
    }

    pub fn n_nodes(&self) -> usize {
        self.neighbors.len()
    }

    pub fn neighbors(&self, node: usize) -> &[usize] {
        &self.neighbors[node]
    }

    pub fn n_edges(&self) -> usize {
        self.neighbors.iter().map(Vec::len).sum::<usize>() / 2
    }

    /// Each undirected edge once, as `(low, high)`.
    pub fn edges(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.neighbors.iter().enumerate().flat_map(|(a, list)| {
            list.iter().copied().filter(move |&b| b > a).map(move |b| (a, b))
        })
    }
}
