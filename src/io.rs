//! Trait boundaries for the external collaborators the core treats as black boxes (§1, §6):
//! the splat source (PLY parser and friends), the GPU kernel façade (splat-tree build, MLS,
//! Marching Cubes), and the mesh sink (stitcher/writer). The core only depends on these traits;
//! concrete file-format/OpenCL implementations are out of scope.

use crate::numeric_types::Real;
use crate::splat::{ChunkId, Splat};

/// A source of splats that can be read in bounded-size chunks, like a PLY file reader.
///
/// Implementations must skip non-finite splats (see [`Splat::is_valid`]) and report how many were
/// skipped through [`SplatStream::non_finite_count`] rather than returning them.
pub trait SplatStream<R: Real>: Send {
    /// A stable numeric id for the file(s) this stream reads from, used as `Range::file_id`
    fn file_id(&self) -> u32;

    /// Reads up to `out.len()` splats (and their ids) into `out`/`ids`, returning the number
    /// actually read. A return value smaller than `out.len()` signals end of stream.
    fn read(&mut self, out: &mut [Splat<R>], ids: &mut [u64]) -> usize;

    /// Total number of non-finite splats skipped so far
    fn non_finite_count(&self) -> u64;
}

/// An in-memory splat stream, the in-process stand-in for a real file-backed reader used by tests
/// and by callers that already have their splats resident in memory.
pub struct SliceSplatStream<'a, R: Real> {
    file_id: u32,
    splats: &'a [Splat<R>],
    cursor: usize,
    non_finite: u64,
}

impl<'a, R: Real> SliceSplatStream<'a, R> {
    pub fn new(file_id: u32, splats: &'a [Splat<R>]) -> Self {
        Self {
            file_id,
            splats,
            cursor: 0,
            non_finite: 0,
        }
    }
}

impl<'a, R: Real> SplatStream<R> for SliceSplatStream<'a, R> {
    fn file_id(&self) -> u32 {
        self.file_id
    }

    fn read(&mut self, out: &mut [Splat<R>], ids: &mut [u64]) -> usize {
        debug_assert_eq!(out.len(), ids.len());
        let mut written = 0;
        while written < out.len() && self.cursor < self.splats.len() {
            let splat = self.splats[self.cursor];
            let id = self.cursor as u64;
            self.cursor += 1;
            if !splat.is_valid() {
                self.non_finite += 1;
                continue;
            }
            out[written] = splat;
            ids[written] = id;
            written += 1;
        }
        written
    }

    fn non_finite_count(&self) -> u64 {
        self.non_finite
    }
}

/// The device-kernel façade: construction of the per-bucket splat tree, MLS evaluation and
/// Marching-Cubes extraction, as seen from the host side. A real implementation enqueues OpenCL
/// work; [`crate::pipeline::device`] only depends on this trait.
pub trait DeviceKernels<R: Real>: Send + Sync {
    /// Opaque output of one bucket's reconstruction, handed to the [`MeshSink`]
    type MeshBlock: Send;

    /// Builds the splat tree, runs MLS + Marching Cubes for one bucket's splats, and returns the
    /// resulting mesh block. Blocking from the caller's perspective; real implementations enqueue
    /// asynchronous device work and wait on its completion event internally.
    fn reconstruct_bucket(&self, splats: &[Splat<R>]) -> Self::MeshBlock;
}

/// Where finished mesh blocks are routed, keyed by chunk id. The pipeline guarantees at most one
/// concurrent call per `ChunkId`.
pub trait MeshSink<B>: Send + Sync {
    /// Consumes one device's mesh block for the given chunk
    fn accept(&self, chunk_id: ChunkId, block: B);
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    #[test]
    fn slice_stream_skips_non_finite_and_reports_count() {
        let splats = vec![
            Splat::new(Vector3::new(0.0, 0.0, 0.0), Vector3::new(0.0, 0.0, 1.0), 1.0),
            Splat::new(Vector3::new(f64::NAN, 0.0, 0.0), Vector3::new(0.0, 0.0, 1.0), 1.0),
            Splat::new(Vector3::new(1.0, 0.0, 0.0), Vector3::new(0.0, 0.0, 1.0), 1.0),
        ];
        let mut stream = SliceSplatStream::new(0, &splats);
        let mut out = vec![Splat::new(Vector3::zeros(), Vector3::zeros(), 1.0); 3];
        let mut ids = vec![0u64; 3];
        let n = stream.read(&mut out, &mut ids);
        assert_eq!(n, 2);
        assert_eq!(stream.non_finite_count(), 1);
        assert_eq!(ids[0], 0);
        assert_eq!(ids[1], 2);
    }
}
