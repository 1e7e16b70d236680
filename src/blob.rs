//! Fast blob index (§4.3): a streaming pass over the input splats that computes, for each splat,
//! the box of internal-size buckets it touches, coalesces consecutive splats with an identical
//! box into a blob, and (de)serializes the result as a mix of 40-byte full and 4-byte
//! differential records.

use crate::aabb::AxisAlignedBoundingBox3d;
use crate::grid::UniformGrid;
use crate::io::SplatStream;
use crate::numeric_types::{Index, Real};
use crate::splat::{BlobInfo, Splat};
use rayon::prelude::*;

const STREAM_BUFFER_SPLATS: usize = 64 * 1024;
const DIFF_DELTA_MIN: i32 = -4;
const DIFF_DELTA_MAX: i32 = 3;
const DIFF_COUNT_BITS: u32 = 19;
const DIFF_COUNT_MAX: u64 = (1u64 << DIFF_COUNT_BITS) - 1;

/// Computes the box of internal-size buckets a splat's influence region touches, in the internal
/// bucket coordinate system (grid reference and cell size of `grid`, divided into
/// `internal_bucket_size`-sized groups of cells).
fn splat_bucket_box<I: Index, R: Real>(
    splat: &Splat<R>,
    grid: &UniformGrid<I, R>,
    internal_bucket_size: I,
) -> ([i32; 3], [i32; 3]) {
    let (lo, hi) = splat.influence_box();
    let mut lower = [0i32; 3];
    let mut upper = [0i32; 3];
    let ibs = internal_bucket_size.to_i64().unwrap_or(1).max(1);
    let cell_lo = grid.world_to_vertex(&lo);
    let cell_hi = grid.world_to_vertex(&hi);
    for i in 0..3 {
        let cl = cell_lo[i].to_i64().unwrap_or(0);
        let ch = cell_hi[i].to_i64().unwrap_or(0);
        lower[i] = cl.div_euclid(ibs) as i32;
        upper[i] = ch.div_euclid(ibs) as i32;
    }
    (lower, upper)
}

/// Encodes one [`BlobInfo`] as a 40-byte full record.
pub fn encode_full(info: &BlobInfo) -> [u8; 40] {
    let mut buf = [0u8; 40];
    let hi = (info.first_splat >> 32) as u32;
    let lo = (info.first_splat & 0xFFFF_FFFF) as u32;
    debug_assert_eq!(hi & 0x8000_0000, 0, "firstSplat too large for the full-record tag bit");
    buf[0..4].copy_from_slice(&hi.to_le_bytes());
    buf[4..8].copy_from_slice(&lo.to_le_bytes());
    buf[8..16].copy_from_slice(&info.last_splat.to_le_bytes());
    for i in 0..3 {
        buf[16 + 4 * i..20 + 4 * i].copy_from_slice(&info.lower[i].to_le_bytes());
    }
    for i in 0..3 {
        buf[28 + 4 * i..32 + 4 * i].copy_from_slice(&info.upper[i].to_le_bytes());
    }
    buf
}

/// Decodes a 40-byte full record back into a [`BlobInfo`].
pub fn decode_full(buf: &[u8; 40]) -> BlobInfo {
    let hi = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as u64;
    let lo = u32::from_le_bytes(buf[4..8].try_into().unwrap()) as u64;
    let first_splat = (hi << 32) | lo;
    let last_splat = u64::from_le_bytes(buf[8..16].try_into().unwrap());
    let mut lower = [0i32; 3];
    let mut upper = [0i32; 3];
    for i in 0..3 {
        lower[i] = i32::from_le_bytes(buf[16 + 4 * i..20 + 4 * i].try_into().unwrap());
    }
    for i in 0..3 {
        upper[i] = i32::from_le_bytes(buf[28 + 4 * i..32 + 4 * i].try_into().unwrap());
    }
    BlobInfo::new(first_splat, last_splat, lower, upper)
}

/// Returns `true` iff `cur` can legally be encoded as a differential record relative to `prev`
/// (§4.3): `prev` and `cur` must be contiguous in splat id, `cur`'s box must be 1 or 2 cells wide
/// per axis, `cur.lower` must be within `[prev.upper - 4, prev.upper + 3]` per axis, and `cur`'s
/// splat count must fit in 19 bits.
pub fn is_differential_legal(prev: &BlobInfo, cur: &BlobInfo) -> bool {
    if cur.first_splat != prev.last_splat + 1 {
        return false;
    }
    if cur.splat_count() - 1 > DIFF_COUNT_MAX {
        return false;
    }
    for i in 0..3 {
        let size = cur.upper[i] - cur.lower[i];
        if !(0..=1).contains(&size) {
            return false;
        }
        let delta = cur.lower[i] - prev.upper[i];
        if !(DIFF_DELTA_MIN..=DIFF_DELTA_MAX).contains(&delta) {
            return false;
        }
    }
    true
}

/// Encodes `cur` as a 4-byte differential record relative to `prev`. Caller must have already
/// checked [`is_differential_legal`].
pub fn encode_differential(prev: &BlobInfo, cur: &BlobInfo) -> [u8; 4] {
    debug_assert!(is_differential_legal(prev, cur));
    let mut payload: u32 = 1 << 31;
    for i in 0..3 {
        let delta = cur.lower[i] - prev.upper[i];
        let delta_bits = (delta & 0x7) as u32;
        payload |= delta_bits << (4 * i);
        let size_bit = (cur.upper[i] - cur.lower[i]) as u32;
        payload |= size_bit << (4 * i + 3);
    }
    let count_m1 = cur.splat_count() - 1;
    payload |= ((count_m1 & DIFF_COUNT_MAX) as u32) << 12;
    payload.to_le_bytes()
}

/// Decodes a 4-byte differential record relative to `prev`.
pub fn decode_differential(buf: &[u8; 4], prev: &BlobInfo) -> BlobInfo {
    let payload = u32::from_le_bytes(*buf);
    debug_assert_eq!(payload >> 31, 1, "not a differential record");
    let mut lower = [0i32; 3];
    let mut upper = [0i32; 3];
    for i in 0..3 {
        let bits = (payload >> (4 * i)) & 0x7;
        let delta = if bits >= 4 { bits as i32 - 8 } else { bits as i32 };
        lower[i] = prev.upper[i] + delta;
        let size_bit = (payload >> (4 * i + 3)) & 1;
        upper[i] = lower[i] + size_bit as i32;
    }
    let count_m1 = ((payload >> 12) & DIFF_COUNT_MAX as u32) as u64;
    let first_splat = prev.last_splat + 1;
    let last_splat = first_splat + count_m1;
    BlobInfo::new(first_splat, last_splat, lower, upper)
}

/// Appends one [`BlobInfo`] to a byte stream, choosing the differential encoding whenever it is
/// legal relative to the stream's previous record and falling back to a full record otherwise.
pub fn encode_one(out: &mut Vec<u8>, prev: Option<&BlobInfo>, cur: &BlobInfo) {
    match prev {
        Some(prev) if is_differential_legal(prev, cur) => out.extend_from_slice(&encode_differential(prev, cur)),
        _ => out.extend_from_slice(&encode_full(cur)),
    }
}

/// Encodes a full stream of (already coalesced) blobs, in order.
pub fn encode_stream(blobs: &[BlobInfo]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut prev: Option<BlobInfo> = None;
    for blob in blobs {
        encode_one(&mut out, prev.as_ref(), blob);
        prev = Some(*blob);
    }
    out
}

/// Decodes a full blob byte stream back into the original sequence of [`BlobInfo`] records.
pub fn decode_stream(bytes: &[u8]) -> Vec<BlobInfo> {
    let mut out = Vec::new();
    let mut prev: Option<BlobInfo> = None;
    let mut offset = 0;
    while offset < bytes.len() {
        let tag = u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap());
        let blob = if tag >> 31 == 1 {
            let buf: [u8; 4] = bytes[offset..offset + 4].try_into().unwrap();
            offset += 4;
            decode_differential(&buf, prev.as_ref().expect("differential record with no prior blob"))
        } else {
            let buf: [u8; 40] = bytes[offset..offset + 40].try_into().unwrap();
            offset += 40;
            decode_full(&buf)
        };
        prev = Some(blob);
        out.push(blob);
    }
    out
}

/// Returns `true` iff the blob stream may be used in place of a fresh splat scan for the given
/// target grid (§4.3 "Fast-path eligibility"): the target bucket size must be an integer multiple
/// of the blob's internal bucket size, the grid spacing must match, the grid reference must be
/// the origin, and the grid's lower extents must be multiples of the internal bucket size.
pub fn is_fast_path_eligible<I: Index, R: Real>(
    bucket_size: I,
    internal_bucket_size: I,
    grid: &UniformGrid<I, R>,
    blob_grid_spacing: R,
) -> bool {
    let bucket_size = bucket_size.to_i64().unwrap_or(0);
    let internal = internal_bucket_size.to_i64().unwrap_or(1).max(1);
    if bucket_size % internal != 0 {
        return false;
    }
    if grid.spacing() != blob_grid_spacing {
        return false;
    }
    if grid.reference().iter().any(|c| *c != R::zero()) {
        return false;
    }
    (0..3).all(|i| grid.lo()[i].to_i64().unwrap_or(0) % internal == 0)
}

/// Sequentially computes the blob stream and enclosing AABB for one slice of splats, starting a
/// new blob whenever a splat's bucket box differs from the running one. `splats[k]` must
/// correspond to `ids[k]` (the two arrays are positionally aligned, as the reader and bucket
/// loader stages keep them), not an index into some larger array.
pub(crate) fn blobs_for_slice<I: Index, R: Real>(
    splats: &[Splat<R>],
    ids: &[u64],
    grid: &UniformGrid<I, R>,
    internal_bucket_size: I,
) -> (Vec<BlobInfo>, Option<AxisAlignedBoundingBox3d<R>>) {
    let mut blobs: Vec<BlobInfo> = Vec::new();
    let mut aabb: Option<AxisAlignedBoundingBox3d<R>> = None;
    for (splat, &id) in splats.iter().zip(ids) {
        let (lower, upper) = splat_bucket_box(splat, grid, internal_bucket_size);
        match aabb.as_mut() {
            Some(aabb) => aabb.extend(splat.position),
            None => aabb = Some(AxisAlignedBoundingBox3d::from_point(splat.position)),
        }
        match blobs.last_mut() {
            Some(last) if last.lower == lower && last.upper == upper => {
                last.last_splat = id;
            }
            _ => blobs.push(BlobInfo::new(id, id, lower, upper)),
        }
    }
    (blobs, aabb)
}

/// Result of a parallel blob-index build over an entire splat set.
pub struct BlobBuildResult<R: Real> {
    pub blobs: Vec<BlobInfo>,
    pub bounds: Option<AxisAlignedBoundingBox3d<R>>,
    pub non_finite_count: u64,
}

/// Builds the full blob index for a splat stream (§4.3 "Parallel build"): the stream is consumed
/// in buffers of `STREAM_BUFFER_SPLATS` splats; each buffer is sliced by thread id into
/// contiguous sub-slices so that every thread emits its own ordered blob sub-stream (the first
/// record of each sub-slice is always a full record, since there is no defined "previous" blob
/// across a thread boundary); results are concatenated in ascending thread order so the final
/// blob sequence corresponds to ascending splat id.
pub fn build_blob_index<I: Index, R: Real>(
    stream: &mut dyn SplatStream<R>,
    grid: &UniformGrid<I, R>,
    internal_bucket_size: I,
) -> BlobBuildResult<R> {
    let mut blobs = Vec::new();
    let mut bounds: Option<AxisAlignedBoundingBox3d<R>> = None;
    let zero_splat = Splat::new(nalgebra::Vector3::zeros(), nalgebra::Vector3::zeros(), R::one());

    loop {
        let mut buf = vec![zero_splat; STREAM_BUFFER_SPLATS];
        let mut ids = vec![0u64; STREAM_BUFFER_SPLATS];
        let n = stream.read(&mut buf, &mut ids);
        if n == 0 {
            break;
        }
        let buf = &buf[..n];
        let ids = &ids[..n];

        let num_threads = rayon::current_num_threads().max(1);
        let chunk_size = n.div_ceil(num_threads).max(1);

        let per_thread: Vec<_> = buf
            .par_chunks(chunk_size)
            .zip(ids.par_chunks(chunk_size))
            .map(|(splats, ids)| blobs_for_slice(splats, ids, grid, internal_bucket_size))
            .collect();

        for (thread_blobs, thread_bounds) in per_thread {
            // The previous blob from the preceding thread's slice is not known to be adjacent
            // (contiguous ids only hold within a slice), so sub-streams are appended, not merged.
            blobs.extend(thread_blobs);
            if let Some(tb) = thread_bounds {
                match bounds.as_mut() {
                    Some(b) => b.join(&tb),
                    None => bounds = Some(tb),
                }
            }
        }

        if n < STREAM_BUFFER_SPLATS {
            break;
        }
    }

    BlobBuildResult {
        blobs,
        bounds,
        non_finite_count: stream.non_finite_count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::SliceSplatStream;
    use nalgebra::Vector3;

    #[test]
    fn full_record_roundtrips() {
        let info = BlobInfo::new(12, 15, [-3, 0, 7], [-2, 1, 8]);
        let buf = encode_full(&info);
        assert_eq!(decode_full(&buf), info);
    }

    #[test]
    fn differential_roundtrips_when_legal() {
        let prev = BlobInfo::new(0, 0, [0, 0, 0], [1, 1, 1]);
        let cur = BlobInfo::new(1, 3, [-3, -3, -3], [-2, -2, -2]);
        assert!(is_differential_legal(&prev, &cur));
        let buf = encode_differential(&prev, &cur);
        assert_eq!(buf.len(), 4);
        assert_eq!(decode_differential(&buf, &prev), cur);
    }

    #[test]
    fn delta_of_minus_five_forces_full_record() {
        let prev = BlobInfo::new(0, 0, [0, 0, 0], [1, 1, 1]);
        let legal = BlobInfo::new(1, 1, [-4 + prev.upper[0], 0, 0], [-4 + prev.upper[0] + 1, 0, 0]);
        let illegal = BlobInfo::new(1, 1, [-5 + prev.upper[0], 0, 0], [-5 + prev.upper[0] + 1, 0, 0]);
        assert!(is_differential_legal(&prev, &legal));
        assert!(!is_differential_legal(&prev, &illegal));
    }

    #[test]
    fn non_contiguous_splat_ids_force_full_record() {
        let prev = BlobInfo::new(0, 0, [0, 0, 0], [1, 1, 1]);
        let cur = BlobInfo::new(5, 5, [0, 0, 0], [1, 1, 1]);
        assert!(!is_differential_legal(&prev, &cur));
    }

    #[test]
    fn too_large_splat_count_forces_full_record() {
        let prev = BlobInfo::new(0, 0, [0, 0, 0], [1, 1, 1]);
        let cur = BlobInfo::new(1, 1 + (1 << 19), [0, 0, 0], [1, 1, 1]);
        assert!(!is_differential_legal(&prev, &cur));
    }

    #[test]
    fn stream_roundtrips_mixed_records() {
        let blobs = vec![
            BlobInfo::new(0, 0, [0, 0, 0], [0, 0, 0]),
            BlobInfo::new(1, 1, [0, 0, 0], [1, 0, 0]),
            BlobInfo::new(2, 50, [1000, 1000, 1000], [1001, 1001, 1001]),
        ];
        let bytes = encode_stream(&blobs);
        let decoded = decode_stream(&bytes);
        assert_eq!(decoded, blobs);
    }

    #[test]
    fn colinear_splats_scenario() {
        // 3 colinear splats, radius 0.1, spacing 1, internal bucket size 1: each has a distinct
        // single-cell bucket box, so 3 blobs are emitted, each of size 1.
        let splats = vec![
            Splat::new(Vector3::new(0.0, 0.0, 0.0), Vector3::new(0.0, 0.0, 1.0), 0.1),
            Splat::new(Vector3::new(0.0, 0.0, 1.0), Vector3::new(0.0, 0.0, 1.0), 0.1),
            Splat::new(Vector3::new(0.0, 0.0, 2.0), Vector3::new(0.0, 0.0, 1.0), 0.1),
        ];
        let grid = UniformGrid::<i64, f64>::new(Vector3::zeros(), 1.0, [0, 0, 0], [10, 10, 10]).unwrap();
        let mut stream = SliceSplatStream::new(0, &splats);
        let result = build_blob_index(&mut stream, &grid, 1i64);
        assert_eq!(result.blobs.len(), 3);

        let bytes = encode_stream(&result.blobs);
        // first record is always full (40 bytes); the remaining 2 should each be representable
        // as 4-byte differential records since consecutive boxes only shift by one cell on z.
        assert_eq!(bytes.len(), 40 + 4 + 4);
        assert_eq!(decode_stream(&bytes), result.blobs);
    }

    #[test]
    fn fast_path_requires_origin_reference_and_multiple_bucket_sizes() {
        let grid = UniformGrid::<i64, f64>::new(Vector3::zeros(), 1.0, [0, 0, 0], [64, 64, 64]).unwrap();
        assert!(is_fast_path_eligible(8i64, 4i64, &grid, 1.0));
        assert!(!is_fast_path_eligible(7i64, 4i64, &grid, 1.0));
        assert!(!is_fast_path_eligible(8i64, 4i64, &grid, 2.0));

        let offset_grid = UniformGrid::<i64, f64>::new(Vector3::new(1.0, 0.0, 0.0), 1.0, [0, 0, 0], [64, 64, 64]).unwrap();
        assert!(!is_fast_path_eligible(8i64, 4i64, &offset_grid, 1.0));
    }
}
