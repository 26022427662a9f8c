//! Deterministic synthetic audio for tests, demos and the `synth` command.
//!
//! Every generator is a pure function of its arguments: noise comes from a
//! `StdRng` with a fixed seed, so two calls always produce identical buffers.

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

use crate::analysis::classifier::DrumComponent;
use crate::audio::AudioBuffer;

/// Sample rate of generated fixtures
pub const FIXTURE_SAMPLE_RATE: u32 = 44_100;

/// Seed for all fixture noise
pub const FIXTURE_SEED: u64 = 0x5A5A_FFF0;

/// Samples of one metronome click
const CLICK_SAMPLES: usize = 2_000;

/// One-shot length in seconds
const HIT_SECONDS: f32 = 0.6;

/// Short decaying 1 kHz click
pub fn click(sample_rate: u32) -> Vec<f32> {
    (0..CLICK_SAMPLES)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (-t / 0.01).exp() * (2.0 * PI * 1_000.0 * t).cos()
        })
        .collect()
}

/// Add `source` into `target` starting at `offset`, clipping at the end
pub fn mix_into(target: &mut [f32], source: &[f32], offset: usize, gain: f32) {
    for (dst, src) in target.iter_mut().skip(offset).zip(source) {
        *dst += src * gain;
    }
}

/// Click track with one click per beat
///
/// The first click lands one beat in, so every click sits on the beat grid
/// anchored at zero. Half a second of silence follows the last click.
pub fn click_track(bpm: f64, clicks: usize, sample_rate: u32) -> AudioBuffer {
    let beat_seconds = 60.0 / bpm;
    let total_seconds = (clicks + 1) as f64 * beat_seconds + 0.5;
    let mut samples = vec![0.0f32; (total_seconds * sample_rate as f64).round() as usize];
    let shape = click(sample_rate);

    for k in 0..clicks {
        let offset = ((k + 1) as f64 * beat_seconds * sample_rate as f64).round() as usize;
        mix_into(&mut samples, &shape, offset, 0.8);
    }
    AudioBuffer::new(samples, sample_rate)
}

/// One-pole lowpass: y += a * (x - y)
fn lowpass(input: &[f32], a: f32) -> Vec<f32> {
    let mut y = 0.0;
    input
        .iter()
        .map(|&x| {
            y += a * (x - y);
            y
        })
        .collect()
}

fn highpass(input: &[f32], a: f32) -> Vec<f32> {
    input
        .iter()
        .zip(lowpass(input, a))
        .map(|(x, low)| x - low)
        .collect()
}

fn noise(len: usize, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
}

fn decay(t: f32, tau: f32) -> f32 {
    (-t / tau).exp()
}

/// Synthesised one-shot of a drum component
pub fn drum_hit(component: DrumComponent, sample_rate: u32) -> Vec<f32> {
    let len = (HIT_SECONDS * sample_rate as f32) as usize;
    let sr = sample_rate as f32;
    let seed = FIXTURE_SEED ^ component as u64;

    match component {
        DrumComponent::Kick => {
            let mut phase = 0.0f32;
            (0..len)
                .map(|i| {
                    let t = i as f32 / sr;
                    let freq = 50.0 + 70.0 * decay(t, 0.03);
                    phase += 2.0 * PI * freq / sr;
                    phase.sin() * decay(t, 0.15)
                })
                .collect()
        }
        DrumComponent::Snare => {
            let body = lowpass(&noise(len, seed), 0.35);
            (0..len)
                .map(|i| {
                    let t = i as f32 / sr;
                    0.5 * (2.0 * PI * 190.0 * t).sin() * decay(t, 0.08)
                        + 1.2 * body[i] * decay(t, 0.07)
                })
                .collect()
        }
        DrumComponent::HiHatClosed | DrumComponent::HiHatOpen => {
            let tau = if component == DrumComponent::HiHatClosed {
                0.03
            } else {
                0.12
            };
            let bright = highpass(&highpass(&noise(len, seed), 0.5), 0.5);
            (0..len)
                .map(|i| 0.7 * bright[i] * decay(i as f32 / sr, tau))
                .collect()
        }
        DrumComponent::Crash => {
            let wash = highpass(&noise(len, seed), 0.3);
            (0..len)
                .map(|i| 0.8 * wash[i] * decay(i as f32 / sr, 0.6))
                .collect()
        }
        DrumComponent::Ride => {
            let sizzle = highpass(&noise(len, seed), 0.5);
            (0..len)
                .map(|i| {
                    let t = i as f32 / sr;
                    let bell = [2_960.0f32, 4_470.0, 5_830.0]
                        .iter()
                        .map(|f| (2.0 * PI * f * t).sin())
                        .sum::<f32>()
                        / 3.0;
                    (0.6 * bell + 0.15 * sizzle[i]) * decay(t, 0.5)
                })
                .collect()
        }
        DrumComponent::TomHigh | DrumComponent::TomLow => {
            let base = if component == DrumComponent::TomHigh {
                260.0
            } else {
                120.0
            };
            let mut phase = 0.0f32;
            (0..len)
                .map(|i| {
                    let t = i as f32 / sr;
                    let freq = base * (1.0 + 0.3 * decay(t, 0.05));
                    phase += 2.0 * PI * freq / sr;
                    0.8 * phase.sin() * decay(t, 0.25)
                })
                .collect()
        }
    }
}

/// A component struck at a beat position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PatternHit {
    /// Position in beats from the start
    pub beat: f64,
    pub component: DrumComponent,
}

/// Render `hits` at `bpm`, with one beat of lead-in silence before the first
pub fn render_pattern(hits: &[PatternHit], bpm: f64, sample_rate: u32) -> AudioBuffer {
    let beat_seconds = 60.0 / bpm;
    let last_beat = hits.iter().map(|h| h.beat).fold(0.0, f64::max);
    let total_seconds = (last_beat + 1.0) * beat_seconds + HIT_SECONDS as f64;
    let mut samples = vec![0.0f32; (total_seconds * sample_rate as f64).round() as usize];

    for hit in hits {
        let offset = ((hit.beat + 1.0) * beat_seconds * sample_rate as f64).round() as usize;
        mix_into(&mut samples, &drum_hit(hit.component, sample_rate), offset, 0.8);
    }
    AudioBuffer::new(samples, sample_rate)
}

/// Alternating kick and snare on quarter notes, hi-hat on the off-beats
///
/// No two hits overlap in time, so every onset carries one component.
pub fn basic_beat(bars: usize) -> Vec<PatternHit> {
    let mut hits = Vec::with_capacity(bars * 8);
    for bar in 0..bars {
        for beat in 0..4 {
            let position = (bar * 4 + beat) as f64;
            let component = if beat % 2 == 0 {
                DrumComponent::Kick
            } else {
                DrumComponent::Snare
            };
            hits.push(PatternHit {
                beat: position,
                component,
            });
            hits.push(PatternHit {
                beat: position + 0.5,
                component: DrumComponent::HiHatClosed,
            });
        }
    }
    hits
}

/// Seeded white noise at `amplitude`
pub fn white_noise(seconds: f64, amplitude: f32, sample_rate: u32) -> AudioBuffer {
    let len = (seconds * sample_rate as f64).round() as usize;
    let samples = noise(len, FIXTURE_SEED)
        .into_iter()
        .map(|x| x * amplitude)
        .collect();
    AudioBuffer::new(samples, sample_rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_click_track_layout() {
        let track = click_track(120.0, 4, FIXTURE_SAMPLE_RATE);
        // 5 beats of 0.5s plus 0.5s tail
        assert_eq!(track.len(), (3.0 * FIXTURE_SAMPLE_RATE as f64) as usize);
        assert_eq!(track.samples()[0], 0.0);
        assert!((track.samples()[22_050] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_generators_are_deterministic() {
        for component in DrumComponent::ALL {
            assert_eq!(
                drum_hit(component, FIXTURE_SAMPLE_RATE),
                drum_hit(component, FIXTURE_SAMPLE_RATE)
            );
        }
        assert_eq!(
            white_noise(0.1, 0.5, FIXTURE_SAMPLE_RATE),
            white_noise(0.1, 0.5, FIXTURE_SAMPLE_RATE)
        );
    }

    #[test]
    fn test_drum_hits_are_bounded() {
        for component in DrumComponent::ALL {
            let hit = drum_hit(component, FIXTURE_SAMPLE_RATE);
            let peak = hit.iter().fold(0.0f32, |acc, x| acc.max(x.abs()));
            assert!(peak > 0.05 && peak < 2.0, "{} peak {}", component, peak);
        }
    }

    #[test]
    fn test_basic_beat_has_no_overlaps() {
        let hits = basic_beat(2);
        assert_eq!(hits.len(), 16);
        let mut beats: Vec<f64> = hits.iter().map(|h| h.beat).collect();
        beats.dedup();
        assert_eq!(beats.len(), 16);
    }

    #[test]
    fn test_render_pattern_places_hits() {
        let audio = render_pattern(
            &[PatternHit {
                beat: 0.0,
                component: DrumComponent::Kick,
            }],
            120.0,
            FIXTURE_SAMPLE_RATE,
        );
        let first_sound = audio.samples().iter().position(|x| x.abs() > 1e-4);
        // Lead-in of one beat at 120 BPM
        assert!(first_sound.is_some_and(|i| (22_050..22_100).contains(&i)));
    }
}
