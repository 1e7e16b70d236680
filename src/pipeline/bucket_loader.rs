//! BucketLoader stage: runs the octree bucket recursion (§4.4) over one chunk of splats the
//! reader produced, materializes each emitted bucket's splats, and hands them to the copy stage.
//! When the blob index (§4.3 "Replay") is eligible for the target grid, routes through the
//! cheaper blob-replay path instead of a fresh per-splat scan.

use crate::blob;
use crate::config::BucketingConfig;
use crate::error::PipelineError;
use crate::grid::UniformGrid;
use crate::io::DeviceKernels;
use crate::numeric_types::{Index, Real};
use crate::octree;
use crate::pipeline::copy::CopyGroup;
use crate::range::Range;
use crate::splat::{Bucket, ChunkId, Splat};
use crate::stats;
use std::sync::atomic::{AtomicU32, Ordering};

/// Count of splats whose cell (by `world_to_vertex`) lies strictly inside `grid`'s half-open
/// extents, used only for progress accounting (§4.8 step 2).
fn progress_splats<I: Index, R: Real>(splats: &[Splat<R>], grid: &UniformGrid<I, R>) -> u64 {
    let lo = grid.lo();
    let hi = grid.hi();
    splats
        .iter()
        .filter(|s| {
            let v = grid.world_to_vertex(&s.position);
            (0..3).all(|i| v[i] >= lo[i] && v[i] < hi[i])
        })
        .count() as u64
}

/// Runs bucket recursion over one chunk's `splats`/`ids` and dispatches every emitted bucket to
/// `copy`. `generation` assigns chunk-id generations in emission order and must be shared across
/// every chunk of the same reconstruction run (the reader drives one call of this function per
/// chunk it reads, so a per-call counter would collide between chunks).
pub fn run<I: Index, R: Real, K: DeviceKernels<R> + 'static, S: crate::io::MeshSink<K::MeshBlock> + 'static>(
    splats: &[Splat<R>],
    ids: &[u64],
    grid: &UniformGrid<I, R>,
    cfg: &BucketingConfig<I>,
    copy: &CopyGroup<R, K, S>,
    generation: &AtomicU32,
) -> Result<(), PipelineError> {
    let mut process = |all_splats: &[Splat<R>], n: u64, ranges: &[Range], bucket_grid: &UniformGrid<I, R>| {
        let coord = [
            bucket_grid.lo()[0].to_i64().unwrap_or(0) as i32,
            bucket_grid.lo()[1].to_i64().unwrap_or(0) as i32,
            bucket_grid.lo()[2].to_i64().unwrap_or(0) as i32,
        ];
        let chunk_id = ChunkId::new(generation.fetch_add(1, Ordering::SeqCst), coord);
        let bucket = Bucket::new(bucket_grid.clone(), ranges.to_vec(), n, chunk_id);

        let mut bucket_splats = Vec::with_capacity(bucket.splat_count as usize);
        for r in &bucket.ranges {
            for id in r.start_index..r.end_index() {
                bucket_splats.push(all_splats[id as usize]);
            }
        }
        let progress = progress_splats(&bucket_splats, &bucket.grid);
        stats::global().add("bucket_loader.buckets_emitted", 1);
        copy.dispatch(bucket.chunk_id, bucket_splats, progress);
        Ok(())
    };

    if blob::is_fast_path_eligible(cfg.max_cells, cfg.internal_bucket_size, grid, grid.spacing()) {
        let (blobs, _bounds) = blob::blobs_for_slice(splats, ids, grid, cfg.internal_bucket_size);
        stats::global().add("bucket_loader.blob_fast_path_chunks", 1);
        octree::bucket_from_blobs(splats, &blobs, grid, cfg, &mut process)
    } else {
        octree::bucket(splats, ids, grid, cfg, &mut process)
    }
}
