//! Integer spatial arithmetic: the uniform reconstruction grid and octree node addressing.

use crate::numeric_types::{Index, Real};
use nalgebra::Vector3;
use thiserror::Error as ThisError;

/// Error constructing a [`UniformGrid`]
#[derive(Debug, ThisError)]
pub enum GridConstructionError {
    #[error("grid spacing must be strictly positive, got {0}")]
    NonPositiveSpacing(String),
    #[error("grid extents must satisfy lo < hi on every axis, got lo={lo:?} hi={hi:?}")]
    InvalidExtents { lo: [i64; 3], hi: [i64; 3] },
}

/// A uniform reconstruction lattice: a reference point, a spacing, and integer extents
/// `[lo_i, hi_i)` per axis.
///
/// Invariants: `spacing > 0`; `lo_i < hi_i` on every axis; sub-grids inherit `spacing` and
/// `reference` from their parent.
#[derive(Clone, Debug, PartialEq)]
pub struct UniformGrid<I: Index, R: Real> {
    reference: Vector3<R>,
    spacing: R,
    lo: [I; 3],
    hi: [I; 3],
}

impl<I: Index, R: Real> UniformGrid<I, R> {
    /// Constructs a new grid, checking the invariants
    pub fn new(
        reference: Vector3<R>,
        spacing: R,
        lo: [I; 3],
        hi: [I; 3],
    ) -> Result<Self, GridConstructionError> {
        if spacing <= R::zero() {
            return Err(GridConstructionError::NonPositiveSpacing(format!(
                "{}",
                spacing
            )));
        }
        if (0..3).any(|i| lo[i] >= hi[i]) {
            return Err(GridConstructionError::InvalidExtents {
                lo: [
                    lo[0].to_i64().unwrap_or_default(),
                    lo[1].to_i64().unwrap_or_default(),
                    lo[2].to_i64().unwrap_or_default(),
                ],
                hi: [
                    hi[0].to_i64().unwrap_or_default(),
                    hi[1].to_i64().unwrap_or_default(),
                    hi[2].to_i64().unwrap_or_default(),
                ],
            });
        }
        Ok(Self {
            reference,
            spacing,
            lo,
            hi,
        })
    }

    /// A degenerate zero-sized grid, only useful as a placeholder/default value
    pub fn new_zero() -> Self {
        Self {
            reference: Vector3::zeros(),
            spacing: R::one(),
            lo: [I::zero(); 3],
            hi: [I::one(); 3],
        }
    }

    pub fn reference(&self) -> &Vector3<R> {
        &self.reference
    }

    pub fn spacing(&self) -> R {
        self.spacing
    }

    pub fn lo(&self) -> [I; 3] {
        self.lo
    }

    pub fn hi(&self) -> [I; 3] {
        self.hi
    }

    /// Number of vertices along axis `i`: `hi_i - lo_i + 1`
    pub fn num_vertices(&self, i: usize) -> I {
        self.hi[i] - self.lo[i] + I::one()
    }

    /// Number of cells along axis `i`: `hi_i - lo_i`
    pub fn num_cells(&self, i: usize) -> I {
        self.hi[i] - self.lo[i]
    }

    /// The largest `num_cells` over all three axes
    pub fn max_num_cells(&self) -> I {
        (0..3)
            .map(|i| self.num_cells(i))
            .max()
            .expect("grid has three axes")
    }

    /// Converts a world-space point to the nearest vertex index (floor of the relative position
    /// divided by spacing), per axis
    pub fn world_to_vertex(&self, point: &Vector3<R>) -> [I; 3] {
        let mut out = [I::zero(); 3];
        for i in 0..3 {
            let rel = (point[i] - self.reference[i]) / self.spacing;
            out[i] = I::from_i64(num::Float::floor(rel).to_i64().unwrap_or_default())
                .unwrap_or_else(I::zero);
        }
        out
    }

    /// Constructs the sub-grid covering `[lo, hi)` (in the same integer coordinate space),
    /// inheriting this grid's spacing and reference point
    pub fn sub_grid(&self, lo: [I; 3], hi: [I; 3]) -> Result<Self, GridConstructionError> {
        Self::new(self.reference, self.spacing, lo, hi)
    }

    /// Constructs a grid whose domain tightly encloses the given AABB, using `cube_size` spacing
    pub fn from_aabb(
        aabb: &crate::aabb::AxisAlignedBoundingBox3d<R>,
        cube_size: R,
    ) -> Result<Self, GridConstructionError> {
        let reference = *aabb.min();
        let mut hi = [I::zero(); 3];
        for i in 0..3 {
            let extent = (aabb.max()[i] - aabb.min()[i]) / cube_size;
            let n_cells = num::Float::ceil(extent).to_i64().unwrap_or(1).max(1);
            hi[i] = I::from_i64(n_cells).unwrap_or_else(I::one);
        }
        Self::new(reference, cube_size, [I::zero(); 3], hi)
    }

    /// Logs a short summary of the grid (vertex counts per axis, spacing) at `info` level
    pub fn log_grid_info(&self) {
        log::info!(
            "Grid: {}x{}x{} vertices, spacing {}",
            self.num_vertices(0),
            self.num_vertices(1),
            self.num_vertices(2),
            self.spacing
        );
    }
}

/// Integer coordinates of an octree cell at a given level; side length in microblocks is `2^level`.
///
/// Node arithmetic is exact 64-bit integer; overflow is treated as a precondition violation
/// (panics), since it can only be caused by a grid larger than representable in 64 bits.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Node {
    pub coords: [i64; 3],
    pub level: u32,
}

impl Node {
    pub fn new(coords: [i64; 3], level: u32) -> Self {
        Self { coords, level }
    }

    /// Side length of this node in microblocks: `2^level`
    pub fn side_in_micro(&self) -> i64 {
        1i64.checked_shl(self.level).expect("level overflows i64 shift")
    }

    /// Returns the half-open microblock range `[coords * 2^level, (coords + 1) * 2^level)` per axis
    pub fn to_micro(&self) -> ([i64; 3], [i64; 3]) {
        let side = self.side_in_micro();
        let mut lo = [0i64; 3];
        let mut hi = [0i64; 3];
        for i in 0..3 {
            lo[i] = self.coords[i]
                .checked_mul(side)
                .expect("node microblock range overflows i64");
            hi[i] = lo[i].checked_add(side).expect("node microblock range overflows i64");
        }
        (lo, hi)
    }

    /// Converts the microblock range to a cell range by multiplying with `micro_size`, optionally
    /// clamping the upper bound to `grid_num_cells` per axis
    pub fn to_cells(&self, micro_size: i64, grid_num_cells: Option<[i64; 3]>) -> ([i64; 3], [i64; 3]) {
        let (micro_lo, micro_hi) = self.to_micro();
        let mut lo = [0i64; 3];
        let mut hi = [0i64; 3];
        for i in 0..3 {
            lo[i] = micro_lo[i].saturating_mul(micro_size);
            hi[i] = micro_hi[i].saturating_mul(micro_size);
            if let Some(clamp) = grid_num_cells {
                hi[i] = hi[i].min(clamp[i]);
            }
        }
        (lo, hi)
    }

    /// Returns the child octant `idx` (`idx` in `[0, 8)`) at `level - 1`.
    ///
    /// Bit 0 of `idx` selects the low/high half on x, bit 1 on y, bit 2 on z (Morton order).
    pub fn child(&self, idx: u32) -> Node {
        debug_assert!(idx < 8);
        debug_assert!(self.level > 0, "cannot take a child of a level-0 node");
        let mut coords = [0i64; 3];
        for axis in 0..3 {
            let bit = (idx >> axis) & 1;
            coords[axis] = self.coords[axis] * 2 + bit as i64;
        }
        Node::new(coords, self.level - 1)
    }
}

/// Recursively visits the virtual octree top-down starting from the single root at
/// `level = levels - 1`, covering `dims` microblocks per axis.
///
/// A node is skipped iff its microblock range is entirely outside `[0, dims)`. The visitor `f`
/// returns `true` to recurse into the node's 8 children, `false` to stop at this node. Traversal
/// visits children in ascending Morton order (child index `0..7` = `(x, y, z)` low bits).
pub fn for_each_node<F>(dims: [i64; 3], levels: u32, mut f: F)
where
    F: FnMut(Node) -> bool,
{
    if levels == 0 {
        return;
    }
    let root = Node::new([0, 0, 0], levels - 1);
    crate::generic_tree::visit_top_down(root, &dims, &mut f);
}

impl crate::generic_tree::OctreeNode for Node {
    type Bounds = [i64; 3];

    fn is_entirely_outside(&self, dims: &[i64; 3]) -> bool {
        let (lo, hi) = self.to_micro();
        (0..3).any(|i| hi[i] <= 0 || lo[i] >= dims[i])
    }

    fn is_leaf(&self) -> bool {
        self.level == 0
    }

    fn child(&self, idx: u32) -> Self {
        Node::child(self, idx)
    }
}
