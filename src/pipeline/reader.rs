//! Reader stage: drains a [`crate::io::SplatStream`] in bounded-size buffers, preserving splat-id
//! order per file (§5), and hands each buffer straight to the caller as one chunk rather than
//! materializing the whole stream — the out-of-core premise this crate exists for means the
//! reader must never hold more than one buffer's worth of splats at a time.

use crate::error::PipelineError;
use crate::io::SplatStream;
use crate::numeric_types::Real;
use crate::splat::Splat;
use crate::stats;
use nalgebra::Vector3;

const READ_BUFFER_SPLATS: usize = 1 << 16;

/// Reads `stream` to completion, calling `on_chunk` once per buffer read (each at most
/// `READ_BUFFER_SPLATS` splats). The ids passed to `on_chunk` are chunk-local (`0..n`, matching
/// each splat's position in that chunk's slice), not the stream's own file-cursor ids, since a
/// chunk's own id space is all downstream bucketing ever needs and the stream's ids can have gaps
/// where non-finite splats were skipped.
pub fn for_each_chunk<R: Real>(
    stream: &mut dyn SplatStream<R>,
    on_chunk: impl FnMut(&[Splat<R>], &[u64]) -> Result<(), PipelineError>,
) -> Result<(), PipelineError> {
    for_each_chunk_sized(stream, READ_BUFFER_SPLATS, on_chunk)
}

fn for_each_chunk_sized<R: Real>(
    stream: &mut dyn SplatStream<R>,
    buffer_splats: usize,
    mut on_chunk: impl FnMut(&[Splat<R>], &[u64]) -> Result<(), PipelineError>,
) -> Result<(), PipelineError> {
    let buffer_splats = buffer_splats.max(1);
    let mut buf_splats = vec![Splat::new(Vector3::zeros(), Vector3::zeros(), R::one()); buffer_splats];
    let mut buf_ids = vec![0u64; buffer_splats];
    let local_ids: Vec<u64> = (0..buffer_splats as u64).collect();

    loop {
        let n = stream.read(&mut buf_splats, &mut buf_ids);
        if n == 0 {
            break;
        }
        stats::global().add("reader.splats_read", n as i64);
        on_chunk(&buf_splats[..n], &local_ids[..n])?;
        if n < buf_splats.len() {
            break;
        }
    }
    stats::global().add("reader.non_finite_skipped", stream.non_finite_count() as i64);
    Ok(())
}
