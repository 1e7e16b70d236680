//! Core out-of-core data model: splats, blob records, chunk ids and bucket work units.

use crate::grid::UniformGrid;
use crate::numeric_types::{Index, Real};
use crate::range::Range;
use nalgebra::Vector3;

/// A single oriented splat: a position, a unit-ish normal, and a positive influence radius.
///
/// A splat's influence region is the axis-aligned box `position ± radius` (see [`Splat::influence_box`]).
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Splat<R: Real> {
    pub position: Vector3<R>,
    pub normal: Vector3<R>,
    pub radius: R,
}

impl<R: Real> Splat<R> {
    /// Constructs a new splat
    pub fn new(position: Vector3<R>, normal: Vector3<R>, radius: R) -> Self {
        Self {
            position,
            normal,
            radius,
        }
    }

    /// Returns `true` iff all seven scalar components of this splat are finite and the radius is positive
    pub fn is_valid(&self) -> bool {
        self.position.iter().all(|c| c.is_finite())
            && self.normal.iter().all(|c| c.is_finite())
            && self.radius.is_finite()
            && self.radius > R::zero()
    }

    /// Returns the lower and upper corner of this splat's influence box (`position +/- radius`)
    pub fn influence_box(&self) -> (Vector3<R>, Vector3<R>) {
        let r = Vector3::new(self.radius, self.radius, self.radius);
        (self.position - r, self.position + r)
    }
}

/// A monotone generation number plus an integer 3D coordinate naming an output mesh tile.
///
/// Totally ordered by generation first; the coordinate-to-generation mapping is expected to be
/// stable across runs of the same job (callers should not rely on coordinate ordering alone).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChunkId {
    pub generation: u32,
    pub coord: [i32; 3],
}

impl ChunkId {
    pub fn new(generation: u32, coord: [i32; 3]) -> Self {
        Self { generation, coord }
    }
}

impl PartialOrd for ChunkId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ChunkId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.generation.cmp(&other.generation)
    }
}

/// A run of consecutive splats sharing an identical bucket-coverage box (inclusive bounds).
///
/// See the blob index (`crate::blob`) for how these are produced, coalesced and (de)serialized.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BlobInfo {
    pub first_splat: u64,
    pub last_splat: u64,
    pub lower: [i32; 3],
    pub upper: [i32; 3],
}

impl BlobInfo {
    pub fn new(first_splat: u64, last_splat: u64, lower: [i32; 3], upper: [i32; 3]) -> Self {
        debug_assert!(last_splat >= first_splat);
        Self {
            first_splat,
            last_splat,
            lower,
            upper,
        }
    }

    /// Number of splats represented by this blob (`lastSplat - firstSplat + 1`)
    pub fn splat_count(&self) -> u64 {
        self.last_splat - self.first_splat + 1
    }
}

/// A unit of reconstruction work: a sub-grid, the splat ranges that fall within it, and the
/// chunk id of the output mesh tile it will eventually produce.
///
/// Invariant: `splat_count <= max_bucket_splats` and every side of `grid` is `<= max_cells`,
/// except when emission was provably impossible (see `DensityError` in [`crate::error`]).
#[derive(Clone, Debug)]
pub struct Bucket<I: Index, R: Real> {
    pub grid: UniformGrid<I, R>,
    pub ranges: Vec<Range>,
    pub splat_count: u64,
    pub chunk_id: ChunkId,
}

impl<I: Index, R: Real> Bucket<I, R> {
    pub fn new(grid: UniformGrid<I, R>, ranges: Vec<Range>, splat_count: u64, chunk_id: ChunkId) -> Self {
        Self {
            grid,
            ranges,
            splat_count,
            chunk_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_splats_are_detected() {
        let good = Splat::new(Vector3::new(0.0f64, 0.0, 0.0), Vector3::new(0.0, 0.0, 1.0), 1.0);
        assert!(good.is_valid());

        let nan_pos = Splat::new(Vector3::new(f64::NAN, 0.0, 0.0), Vector3::new(0.0, 0.0, 1.0), 1.0);
        assert!(!nan_pos.is_valid());

        let zero_radius = Splat::new(Vector3::new(0.0f64, 0.0, 0.0), Vector3::new(0.0, 0.0, 1.0), 0.0);
        assert!(!zero_radius.is_valid());
    }

    #[test]
    fn influence_box_is_centered_on_position() {
        let s = Splat::new(Vector3::new(1.0f64, 2.0, 3.0), Vector3::new(0.0, 0.0, 1.0), 0.5);
        let (lo, hi) = s.influence_box();
        assert_eq!(lo, Vector3::new(0.5, 1.5, 2.5));
        assert_eq!(hi, Vector3::new(1.5, 2.5, 3.5));
    }

    #[test]
    fn chunk_id_orders_by_generation_only() {
        let a = ChunkId::new(1, [5, 5, 5]);
        let b = ChunkId::new(2, [0, 0, 0]);
        assert!(a < b);
    }

    #[test]
    fn blob_splat_count() {
        let b = BlobInfo::new(10, 12, [0, 0, 0], [1, 1, 1]);
        assert_eq!(b.splat_count(), 3);
    }
}
