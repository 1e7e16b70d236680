//! Per-bucket GPU splat tree construction (§4.6).
//!
//! Built CPU-side and shipped to the device: a `commands[]` array (the on-device traversal
//! program) plus a `start[x,y,z]` lookup table addressed by [`crate::morton::make_code`]. A
//! lookup yields an offset into `commands`; the device worker reads splat ids until it hits a
//! sentinel, which either terminates the run or jumps up to the parent cell's run.

use crate::morton;
use crate::numeric_types::{Index, Real};
use crate::splat::Splat;
use crate::{new_map, MapType};

/// One `(level, code, splatId)` triple: the splat covers this octree cell at this level.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub level: u32,
    pub code: u64,
    pub splat_id: u64,
}

/// Finished splat tree for one bucket: the command stream plus the finest-level lookup table.
#[derive(Clone, Debug)]
pub struct SplatTree {
    /// Splat ids interleaved with sentinel terminators (`-1` or `-2 - parentStart`)
    pub commands: Vec<i64>,
    /// Indexed by `make_code(x, y, z)` at the finest (single-cell) level
    pub start: Vec<i64>,
    /// Side length, in cells, of the cube this tree's finest level addresses (a power of two)
    pub side0: i64,
    /// Level of the tree's root (coarsest level, a single cell spanning the whole cube)
    pub top_level: u32,
}

fn next_pow2(v: i64) -> i64 {
    let mut p = 1i64;
    while p < v.max(1) {
        p <<= 1;
    }
    p
}

/// Conservative `[lo, hi)` cell range (local to `grid`, clamped to `[0, numCells)`) covered by a
/// splat's influence box.
fn local_cell_range<I: Index, R: Real>(splat: &Splat<R>, grid: &crate::grid::UniformGrid<I, R>) -> ([i64; 3], [i64; 3]) {
    let (lo, hi) = splat.influence_box();
    let lo_v = grid.world_to_vertex(&lo);
    let hi_v = grid.world_to_vertex(&hi);
    let mut lo_local = [0i64; 3];
    let mut hi_local = [0i64; 3];
    for i in 0..3 {
        let grid_lo = grid.lo()[i].to_i64().unwrap_or(0);
        let num_cells = grid.num_cells(i).to_i64().unwrap_or(1).max(1);
        let l = (lo_v[i].to_i64().unwrap_or(0) - grid_lo).clamp(0, num_cells - 1);
        let h = (hi_v[i].to_i64().unwrap_or(0) - grid_lo + 1).clamp(l + 1, num_cells);
        lo_local[i] = l;
        hi_local[i] = h;
    }
    (lo_local, hi_local)
}

/// Finds the smallest level at which the given local cell range spans at most 2 microblocks per
/// axis, and returns every microblock coordinate it covers at that level.
fn choose_level_and_cells(lo_local: [i64; 3], hi_local_excl: [i64; 3]) -> (u32, Vec<[i64; 3]>) {
    for level in 0..32u32 {
        let mut lo_m = [0i64; 3];
        let mut hi_m = [0i64; 3]; // inclusive
        let mut fits = true;
        for i in 0..3 {
            lo_m[i] = lo_local[i] >> level;
            hi_m[i] = (hi_local_excl[i] - 1).max(0) >> level;
            if hi_m[i] - lo_m[i] + 1 > 2 {
                fits = false;
            }
        }
        if fits {
            let mut cells = Vec::new();
            for x in lo_m[0]..=hi_m[0] {
                for y in lo_m[1]..=hi_m[1] {
                    for z in lo_m[2]..=hi_m[2] {
                        cells.push([x, y, z]);
                    }
                }
            }
            return (level, cells);
        }
    }
    (31, vec![[0, 0, 0]])
}

/// Emits one `(level, code, splatId)` entry per cell each splat covers (§4.6 step 1-2).
pub fn build_entries<I: Index, R: Real>(
    splats: &[Splat<R>],
    ids: &[u64],
    grid: &crate::grid::UniformGrid<I, R>,
) -> Vec<Entry> {
    let mut entries = Vec::new();
    for &id in ids {
        let splat = &splats[id as usize];
        let (lo, hi) = local_cell_range(splat, grid);
        let (level, cells) = choose_level_and_cells(lo, hi);
        for c in cells {
            let code = morton::make_code(c[0] as u32, c[1] as u32, c[2] as u32);
            entries.push(Entry {
                level,
                code,
                splat_id: id,
            });
        }
    }
    entries
}

/// Stable-sorts entries by level ascending, then code descending (§4.6 step 3)
pub fn sort_entries(entries: &mut [Entry]) {
    entries.sort_by_key(|e| morton::entry_sort_key(e.level, e.code));
}

/// Builds the full splat tree for one bucket's splats (§4.6 steps 1-5)
pub fn build<I: Index, R: Real>(splats: &[Splat<R>], ids: &[u64], grid: &crate::grid::UniformGrid<I, R>) -> SplatTree {
    let mut entries = build_entries(splats, ids, grid);
    sort_entries(&mut entries);

    let mut groups: MapType<(u32, u64), Vec<u64>> = new_map();
    for e in &entries {
        groups.entry((e.level, e.code)).or_default().push(e.splat_id);
    }

    let side0 = next_pow2(grid.max_num_cells().to_i64().unwrap_or(1));
    let top_level = side0.trailing_zeros();
    let finest_domain = (side0 * side0 * side0).max(1) as usize;

    let mut start = vec![-1i64; finest_domain];
    let mut commands = Vec::new();

    for level in (0..=top_level).rev() {
        let domain_side = side0 >> level;
        let domain_codes = (domain_side * domain_side * domain_side) as u64;
        for code in (0..domain_codes).rev() {
            if let Some(ids) = groups.get(&(level, code)) {
                let offset = commands.len() as i64;
                for &id in ids {
                    commands.push(id as i64);
                }
                let terminator = if level == top_level {
                    -1
                } else {
                    let parent_start = start[(code >> 3) as usize];
                    -2 - parent_start
                };
                commands.push(terminator);
                start[code as usize] = offset;
            } else if level != top_level {
                start[code as usize] = start[(code >> 3) as usize];
            }
        }
    }

    SplatTree {
        commands,
        start,
        side0,
        top_level,
    }
}
