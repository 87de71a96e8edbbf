// Continuous recording to time-bounded chunk files
//
// The allocator owns chunk naming, the recorder owns the background loop.
// Both only ever talk to the camera through the shared device session.

pub mod allocator;
pub mod recorder;

pub use allocator::{ChunkAllocator, ChunkSource, SharedChunkSource};
pub use recorder::{Recorder, RecorderSettings};
