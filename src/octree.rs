//! Bucket recursion (§4.4): recursively subdivides a grid into buckets small enough to
//! reconstruct on a single GPU, without ever materializing more than the splats relevant to one
//! recursion branch.
//!
//! The virtual octree is walked top-down (see [`crate::generic_tree`]); at each cell a histogram
//! pass counts splats per octant so cells with zero splats can be pruned, then a partition pass
//! routes each splat's range into the octants it conservatively intersects (box-vs-box, never
//! sphere-refined — see spec Non-goals). The branching factor per level is chosen per axis so the
//! total number of children never exceeds `cfg.max_split` (§4.4 steps 2-3). A cell that cannot be
//! reduced below `max_bucket_splats` even as a single grid cell raises
//! [`PipelineError::DensityError`].

use crate::config::BucketingConfig;
use crate::error::PipelineError;
use crate::grid::UniformGrid;
use crate::numeric_types::{Index, Real};
use crate::range::{Range, RangeCollector};
use crate::splat::{BlobInfo, Splat};

/// Callback invoked once per emitted bucket: splat storage, splat count, the coalesced ranges
/// naming the splats in this bucket (ordered by splat id), and the bucket's sub-grid.
pub type BucketProcessor<'a, I, R> =
    dyn FnMut(&[Splat<R>], u64, &[Range], &UniformGrid<I, R>) -> Result<(), PipelineError> + 'a;

/// Recursively subdivides `grid` into buckets satisfying both `cfg.max_bucket_splats` and
/// `cfg.max_cells`, invoking `process` once per emitted bucket. `ids` names the splats to
/// consider, as absolute indices into `splats`; every id's splat must intersect `grid` or lie
/// entirely outside it (splats entirely outside the grid are simply never routed anywhere).
pub fn bucket<I: Index, R: Real>(
    splats: &[Splat<R>],
    ids: &[u64],
    grid: &UniformGrid<I, R>,
    cfg: &BucketingConfig<I>,
    process: &mut BucketProcessor<'_, I, R>,
) -> Result<(), PipelineError> {
    bucket_rec(splats, ids, grid, cfg, process)
}

/// Fast-path bucket reconstruction from an already-built blob index (§4.3 "Replay"): groups the
/// blob stream's contiguous spans by the coarse bucket their lower corner divides into (dividing
/// by `max_cells / internal_bucket_size`, both in internal-bucket units) instead of re-deriving
/// bucket membership with a fresh per-splat geometric scan. A group whose splat count or cell span
/// still exceeds the caps (the blob's internal buckets happened to straddle a boundary unevenly)
/// falls back to [`bucket_rec`] over just that group's own ids.
pub fn bucket_from_blobs<I: Index, R: Real>(
    splats: &[Splat<R>],
    blobs: &[BlobInfo],
    grid: &UniformGrid<I, R>,
    cfg: &BucketingConfig<I>,
    process: &mut BucketProcessor<'_, I, R>,
) -> Result<(), PipelineError> {
    let bucket_size = cfg.max_cells.to_i64().unwrap_or(1).max(1);
    let internal = cfg.internal_bucket_size.to_i64().unwrap_or(1).max(1);
    let ratio = (bucket_size / internal).max(1);

    let mut by_bucket: std::collections::BTreeMap<[i64; 3], Vec<Range>> = std::collections::BTreeMap::new();
    for blob in blobs {
        let mut key = [0i64; 3];
        for axis in 0..3 {
            key[axis] = (blob.lower[axis] as i64).div_euclid(ratio);
        }
        let ranges = by_bucket.entry(key).or_default();
        match ranges.last_mut() {
            Some(last) if last.end_index() == blob.first_splat => {
                last.count += blob.splat_count();
            }
            _ => ranges.push(Range::new(0, blob.first_splat, blob.splat_count())),
        }
    }

    let lo = grid.lo();
    let hi = grid.hi();
    let max_cells_i64 = cfg.max_cells.to_i64().unwrap_or(i64::MAX);

    for (key, mut ranges) in by_bucket {
        ranges.sort_by_key(|r| r.start_index);
        let splat_count: u64 = ranges.iter().map(|r| r.count).sum();

        let mut o_lo = lo;
        let mut o_hi = hi;
        let mut cells = [0i64; 3];
        for axis in 0..3 {
            let raw_lo = key[axis] * ratio * internal;
            let raw_hi = raw_lo + bucket_size;
            let grid_lo = lo[axis].to_i64().unwrap_or(0);
            let grid_hi = hi[axis].to_i64().unwrap_or(raw_hi);
            let clipped_lo = raw_lo.max(grid_lo);
            let clipped_hi = raw_hi.min(grid_hi);
            o_lo[axis] = I::from_i64(clipped_lo).unwrap_or(lo[axis]);
            o_hi[axis] = I::from_i64(clipped_hi).unwrap_or(hi[axis]);
            cells[axis] = (clipped_hi - clipped_lo).max(0);
        }
        debug_assert!(cells.iter().all(|&c| c > 0), "blob bucket key maps outside the target grid");

        let sub_grid = grid
            .sub_grid(o_lo, o_hi)
            .map_err(|e| PipelineError::StateError(format!("invalid sub-grid during blob replay: {e}")))?;

        if splat_count <= cfg.max_bucket_splats && cells.iter().all(|&c| c <= max_cells_i64) {
            process(splats, splat_count, &ranges, &sub_grid)?;
        } else {
            let mut ids = Vec::with_capacity(splat_count as usize);
            for r in &ranges {
                for id in r.start_index..r.end_index() {
                    ids.push(id);
                }
            }
            bucket_rec(splats, &ids, &sub_grid, cfg, process)?;
        }
    }

    Ok(())
}

fn grid_max_cells<I: Index, R: Real>(grid: &UniformGrid<I, R>) -> i64 {
    (0..3)
        .map(|i| grid.num_cells(i).to_i64().unwrap_or(i64::MAX))
        .max()
        .unwrap_or(0)
}

/// Conservative cell range `[lo, hi)` (absolute grid cell coordinates) covered by a splat's
/// influence box.
fn splat_cell_range<I: Index, R: Real>(splat: &Splat<R>, grid: &UniformGrid<I, R>) -> ([i64; 3], [i64; 3]) {
    let (lo, hi) = splat.influence_box();
    let lo_v = grid.world_to_vertex(&lo);
    let hi_v = grid.world_to_vertex(&hi);
    let mut rlo = [0i64; 3];
    let mut rhi = [0i64; 3];
    for i in 0..3 {
        rlo[i] = lo_v[i].to_i64().unwrap_or(0);
        rhi[i] = hi_v[i].to_i64().unwrap_or(0) + 1;
    }
    (rlo, rhi)
}

/// `true` iff the half-open cell ranges `[a_lo, a_hi)` and `[b_lo, b_hi)` overlap on every axis
fn ranges_intersect(a_lo: [i64; 3], a_hi: [i64; 3], b_lo: [i64; 3], b_hi: [i64; 3]) -> bool {
    (0..3).all(|i| a_lo[i] < b_hi[i] && b_lo[i] < a_hi[i])
}

/// Chooses a per-axis split factor (each a power of two) so the total number of children
/// `s[0]*s[1]*s[2]` never exceeds `max_split` (§4.4 step 2's "smallest microSize such that the
/// number of microblocks tiling the cell is <= maxSplit", generalized to 3 independent axes).
/// Greedily doubles whichever axis currently has the most cells left per child, one doubling at a
/// time, stopping once no axis can double without breaking the budget or its own cell count.
///
/// If `max_split` is too small to afford even one doubling, forces a single split on the longest
/// axis anyway: recursion must always make progress once `side > max_cells`, and the caller has
/// already verified at least one axis has more than one cell.
fn choose_splits(side_cells: [i64; 3], max_split: u64) -> [i64; 3] {
    let mut s = [1i64; 3];
    let budget = max_split.max(1);
    loop {
        let product = (s[0] * s[1] * s[2]) as u64;
        let mut best: Option<usize> = None;
        let mut best_ratio = 1i64;
        for axis in 0..3 {
            if s[axis] >= side_cells[axis] {
                continue;
            }
            if product.saturating_mul(2) > budget {
                continue;
            }
            let ratio = side_cells[axis] / s[axis];
            if best.is_none() || ratio > best_ratio {
                best = Some(axis);
                best_ratio = ratio;
            }
        }
        match best {
            Some(axis) => s[axis] *= 2,
            None => break,
        }
    }
    if s == [1, 1, 1] {
        if let Some(axis) = (0..3).max_by_key(|&axis| side_cells[axis]) {
            if side_cells[axis] > 1 {
                s[axis] = 2;
            }
        }
    }
    s
}

/// Cell-coordinate boundaries of `splits` equal-ish partitions of `[lo, hi)`, `splits + 1` entries
/// from `lo` to `hi` inclusive. Any remainder is spread over the first partitions, one cell each.
fn axis_boundaries(lo: i64, hi: i64, splits: i64) -> Vec<i64> {
    let total = hi - lo;
    let base = total / splits;
    let rem = total % splits;
    let mut bounds = Vec::with_capacity(splits as usize + 1);
    let mut cur = lo;
    bounds.push(cur);
    for k in 0..splits {
        cur += base + if k < rem { 1 } else { 0 };
        bounds.push(cur);
    }
    bounds
}

fn bucket_rec<I: Index, R: Real>(
    splats: &[Splat<R>],
    ids: &[u64],
    grid: &UniformGrid<I, R>,
    cfg: &BucketingConfig<I>,
    process: &mut BucketProcessor<'_, I, R>,
) -> Result<(), PipelineError> {
    let n_splats = ids.len() as u64;
    let side = grid_max_cells(grid);
    let max_cells = cfg.max_cells.to_i64().unwrap_or(i64::MAX);

    if n_splats <= cfg.max_bucket_splats && side <= max_cells {
        emit(splats, ids, grid, process)?;
        return Ok(());
    }

    if side <= 1 {
        // A single grid cell cannot be subdivided further: recursion is stuck.
        return Err(PipelineError::DensityError(n_splats));
    }

    // Histogram + partition pass: split `grid` per axis (bounded by `cfg.max_split` children
    // total) and route each splat's range into every child whose cell range it conservatively
    // intersects.
    let lo = grid.lo();
    let hi = grid.hi();
    let side_cells = [0, 1, 2].map(|i| grid.num_cells(i).to_i64().unwrap_or(1).max(1));
    let splits = choose_splits(side_cells, cfg.max_split);

    let bounds: Vec<Vec<i64>> = (0..3)
        .map(|axis| axis_boundaries(lo[axis].to_i64().unwrap_or(0), hi[axis].to_i64().unwrap_or(0), splits[axis]))
        .collect();

    let total_children = (splits[0] * splits[1] * splits[2]) as usize;
    let mut children: Vec<Vec<u64>> = vec![Vec::new(); total_children];
    let child_index = |ix: i64, iy: i64, iz: i64| -> usize { (ix + iy * splits[0] + iz * splits[0] * splits[1]) as usize };

    for &id in ids {
        let splat = &splats[id as usize];
        let (s_lo, s_hi) = splat_cell_range(splat, grid);
        for iz in 0..splits[2] {
            for iy in 0..splits[1] {
                for ix in 0..splits[0] {
                    let c_lo = [bounds[0][ix as usize], bounds[1][iy as usize], bounds[2][iz as usize]];
                    let c_hi = [
                        bounds[0][ix as usize + 1],
                        bounds[1][iy as usize + 1],
                        bounds[2][iz as usize + 1],
                    ];
                    if ranges_intersect(s_lo, s_hi, c_lo, c_hi) {
                        children[child_index(ix, iy, iz)].push(id);
                    }
                }
            }
        }
    }

    for iz in 0..splits[2] {
        for iy in 0..splits[1] {
            for ix in 0..splits[0] {
                let child_ids = &children[child_index(ix, iy, iz)];
                if child_ids.is_empty() {
                    continue; // zero-splat cells are pruned
                }
                let mut c_lo = lo;
                let mut c_hi = hi;
                for axis in 0..3 {
                    let (bix, axis_bounds) = match axis {
                        0 => (ix, &bounds[0]),
                        1 => (iy, &bounds[1]),
                        _ => (iz, &bounds[2]),
                    };
                    c_lo[axis] = I::from_i64(axis_bounds[bix as usize]).unwrap_or(lo[axis]);
                    c_hi[axis] = I::from_i64(axis_bounds[bix as usize + 1]).unwrap_or(hi[axis]);
                }
                let sub_grid = grid
                    .sub_grid(c_lo, c_hi)
                    .map_err(|e| PipelineError::StateError(format!("invalid sub-grid during bucketing: {e}")))?;
                bucket_rec(splats, child_ids, &sub_grid, cfg, process)?;
            }
        }
    }

    Ok(())
}

fn emit<I: Index, R: Real>(
    splats: &[Splat<R>],
    ids: &[u64],
    grid: &UniformGrid<I, R>,
    process: &mut BucketProcessor<'_, I, R>,
) -> Result<(), PipelineError> {
    let mut sorted_ids = ids.to_vec();
    sorted_ids.sort_unstable();

    let mut ranges = Vec::new();
    {
        let mut collector = RangeCollector::new(&mut ranges);
        for &id in &sorted_ids {
            collector.push(0, id)?;
        }
    }

    process(splats, sorted_ids.len() as u64, &ranges, grid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    fn uniform_splats(n_per_axis: i64, spacing: f64) -> Vec<Splat<f64>> {
        let mut splats = Vec::new();
        for x in 0..n_per_axis {
            for y in 0..n_per_axis {
                for z in 0..n_per_axis {
                    splats.push(Splat::new(
                        Vector3::new(x as f64 * spacing + 0.5, y as f64 * spacing + 0.5, z as f64 * spacing + 0.5),
                        Vector3::new(0.0, 0.0, 1.0),
                        0.05,
                    ));
                }
            }
        }
        splats
    }

    #[test]
    fn choose_splits_respects_the_max_split_budget() {
        assert_eq!(choose_splits([64, 64, 64], 64), [4, 4, 4]);
        assert_eq!(choose_splits([64, 64, 64], 1), [1, 1, 2]);
        assert_eq!(choose_splits([8, 1, 1], 100), [8, 1, 1]);
    }

    #[test]
    fn axis_boundaries_spread_any_remainder_over_the_first_partitions() {
        assert_eq!(axis_boundaries(0, 10, 4), vec![0, 3, 6, 8, 10]);
        assert_eq!(axis_boundaries(0, 8, 4), vec![0, 2, 4, 6, 8]);
    }

    #[test]
    fn scenario_1_uniform_grid_produces_bounded_buckets() {
        let splats = uniform_splats(10, 6.4); // 1000 splats spread across a 64-wide grid
        let grid = UniformGrid::<i64, f64>::new(Vector3::zeros(), 1.0, [0, 0, 0], [64, 64, 64]).unwrap();
        let ids: Vec<u64> = (0..splats.len() as u64).collect();
        let cfg = BucketingConfig {
            max_bucket_splats: 200,
            max_cells: 16,
            max_split: 64,
            internal_bucket_size: 4,
        };

        let mut bucket_count = 0usize;
        let mut total_splats = 0u64;
        let mut seen_ids = std::collections::HashSet::new();
        bucket(
            &splats,
            &ids,
            &grid,
            &cfg,
            &mut |bucket_splats, n, ranges, bucket_grid| {
                assert!(n <= cfg.max_bucket_splats);
                assert!((0..3).all(|i| bucket_grid.num_cells(i) <= cfg.max_cells));
                for r in ranges {
                    for id in r.start_index..r.end_index() {
                        seen_ids.insert(id);
                    }
                }
                total_splats += n;
                bucket_count += 1;
                let _ = bucket_splats;
                Ok(())
            },
        )
        .unwrap();

        assert!(bucket_count >= 1);
        assert_eq!(total_splats, splats.len() as u64);
        assert_eq!(seen_ids.len(), splats.len());
    }

    #[test]
    fn a_tight_max_split_still_converges_to_the_same_caps() {
        let splats = uniform_splats(10, 6.4);
        let grid = UniformGrid::<i64, f64>::new(Vector3::zeros(), 1.0, [0, 0, 0], [64, 64, 64]).unwrap();
        let ids: Vec<u64> = (0..splats.len() as u64).collect();
        let cfg = BucketingConfig {
            max_bucket_splats: 200,
            max_cells: 16,
            max_split: 2, // forces single-axis bisection each level instead of octant splits
            internal_bucket_size: 4,
        };

        let mut bucket_count = 0usize;
        let mut total_splats = 0u64;
        bucket(&splats, &ids, &grid, &cfg, &mut |_, n, _, bucket_grid| {
            assert!(n <= cfg.max_bucket_splats);
            assert!((0..3).all(|i| bucket_grid.num_cells(i) <= cfg.max_cells));
            total_splats += n;
            bucket_count += 1;
            Ok(())
        })
        .unwrap();

        assert!(bucket_count >= 1);
        assert_eq!(total_splats, splats.len() as u64);
    }

    #[test]
    fn scenario_2_empty_input_calls_process_zero_times() {
        let grid = UniformGrid::<i64, f64>::new(Vector3::zeros(), 1.0, [0, 0, 0], [8, 8, 8]).unwrap();
        let splats: Vec<Splat<f64>> = Vec::new();
        let cfg = BucketingConfig {
            max_bucket_splats: 10,
            max_cells: 4,
            max_split: 8,
            internal_bucket_size: 1,
        };
        let mut calls = 0;
        bucket(&splats, &[], &grid, &cfg, &mut |_, _, _, _| {
            calls += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(calls, 0);
    }

    #[test]
    fn whole_grid_emitted_as_one_bucket_when_caps_are_generous() {
        let splats = uniform_splats(4, 2.0);
        let grid = UniformGrid::<i64, f64>::new(Vector3::zeros(), 1.0, [0, 0, 0], [16, 16, 16]).unwrap();
        let ids: Vec<u64> = (0..splats.len() as u64).collect();
        let cfg = BucketingConfig {
            max_bucket_splats: splats.len() as u64,
            max_cells: 16,
            max_split: 8,
            internal_bucket_size: 1,
        };
        let mut calls = 0;
        bucket(&splats, &ids, &grid, &cfg, &mut |_, n, _, bucket_grid| {
            calls += 1;
            assert_eq!(n, splats.len() as u64);
            assert_eq!(bucket_grid.lo(), grid.lo());
            assert_eq!(bucket_grid.hi(), grid.hi());
            Ok(())
        })
        .unwrap();
        assert_eq!(calls, 1);
    }

    #[test]
    fn scenario_3_density_error_when_a_single_cell_is_overloaded() {
        let mut splats = Vec::new();
        for i in 0..10 {
            splats.push(Splat::new(
                Vector3::new(0.1 + i as f64 * 0.001, 0.1, 0.1),
                Vector3::new(0.0, 0.0, 1.0),
                0.01,
            ));
        }
        let grid = UniformGrid::<i64, f64>::new(Vector3::zeros(), 1.0, [0, 0, 0], [1, 1, 1]).unwrap();
        let ids: Vec<u64> = (0..splats.len() as u64).collect();
        let cfg = BucketingConfig {
            max_bucket_splats: 5,
            max_cells: 16,
            max_split: 8,
            internal_bucket_size: 1,
        };
        let result = bucket(&splats, &ids, &grid, &cfg, &mut |_, _, _, _| Ok(()));
        assert!(matches!(result, Err(PipelineError::DensityError(10))));
    }

    #[test]
    fn bucket_from_blobs_matches_the_per_splat_path_on_an_eligible_grid() {
        let splats = uniform_splats(8, 1.0); // 512 splats on a grid whose spacing/reference are blob-eligible
        let grid = UniformGrid::<i64, f64>::new(Vector3::zeros(), 1.0, [0, 0, 0], [16, 16, 16]).unwrap();
        let ids: Vec<u64> = (0..splats.len() as u64).collect();
        let cfg = BucketingConfig {
            max_bucket_splats: 200,
            max_cells: 4,
            max_split: 8,
            internal_bucket_size: 2,
        };
        assert!(crate::blob::is_fast_path_eligible(
            cfg.max_cells,
            cfg.internal_bucket_size,
            &grid,
            grid.spacing()
        ));
        let (blobs, _) = crate::blob::blobs_for_slice(&splats, &ids, &grid, cfg.internal_bucket_size);

        let mut total_splats = 0u64;
        let mut seen_ids = std::collections::HashSet::new();
        bucket_from_blobs(&splats, &blobs, &grid, &cfg, &mut |_, n, ranges, bucket_grid| {
            assert!(n <= cfg.max_bucket_splats);
            assert!((0..3).all(|i| bucket_grid.num_cells(i) <= cfg.max_cells));
            for r in ranges {
                for id in r.start_index..r.end_index() {
                    seen_ids.insert(id);
                }
            }
            total_splats += n;
            Ok(())
        })
        .unwrap();

        assert_eq!(total_splats, splats.len() as u64);
        assert_eq!(seen_ids.len(), splats.len());
    }
}
