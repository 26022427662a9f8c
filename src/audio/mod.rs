// Audio module - immutable PCM buffers and WAV file IO
//
// The generation pipeline works on complete mono buffers. Decoding lives here
// only so the CLI and tests can feed files; the pipeline itself never touches
// the filesystem.

pub mod buffer;
pub mod wav;

pub use buffer::AudioBuffer;
