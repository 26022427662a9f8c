//! Test and demo harness utilities.
//!
//! Deterministic synthetic drum audio plus scripted `StemIsolator`
//! implementations that exercise slow, failing and cancelled separation.
//! The `synth` CLI command renders the same fixtures to WAV.

pub mod fixtures;
pub mod isolators;

pub use fixtures::{
    basic_beat, click_track, drum_hit, render_pattern, white_noise, PatternHit,
    FIXTURE_SAMPLE_RATE,
};
pub use isolators::{FailingIsolator, FailureMode, SlowIsolator};
