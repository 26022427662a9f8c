//! WAV decoding/encoding via `hound`.

use std::path::Path;

use super::AudioBuffer;
use crate::error::AudioError;

/// Read a WAV file into a mono [`AudioBuffer`], downmixing if needed.
pub fn read_wav(path: &Path) -> Result<AudioBuffer, AudioError> {
    let mut reader = hound::WavReader::open(path).map_err(|err| AudioError::DecodeFailed {
        reason: format!("failed to open {}: {err}", path.display()),
    })?;
    let spec = reader.spec();
    if spec.channels == 0 {
        return Err(AudioError::DecodeFailed {
            reason: format!("{} has zero channels", path.display()),
        });
    }

    let samples = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|sample| {
                sample.map_err(|err| AudioError::DecodeFailed {
                    reason: format!("error reading {}: {err}", path.display()),
                })
            })
            .collect::<Result<Vec<f32>, _>>()?,
        hound::SampleFormat::Int => {
            let bits = spec.bits_per_sample;
            if !(8..=32).contains(&bits) {
                return Err(AudioError::DecodeFailed {
                    reason: format!(
                        "unsupported bits_per_sample={} for {}",
                        bits,
                        path.display()
                    ),
                });
            }
            let scale = (1_i64 << (bits - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|sample| {
                    sample
                        .map(|v| v as f32 / scale)
                        .map_err(|err| AudioError::DecodeFailed {
                            reason: format!("error reading {}: {err}", path.display()),
                        })
                })
                .collect::<Result<Vec<f32>, _>>()?
        }
    };

    log::debug!(
        "[Wav] Read {} samples ({} ch @ {} Hz) from {}",
        samples.len(),
        spec.channels,
        spec.sample_rate,
        path.display()
    );

    AudioBuffer::from_interleaved(&samples, spec.channels, spec.sample_rate)
}

/// Write a mono buffer as 16-bit PCM.
pub fn write_wav(path: &Path, buffer: &AudioBuffer) -> Result<(), AudioError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: buffer.sample_rate(),
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for &sample in buffer.samples() {
        let clamped = sample.clamp(-1.0, 1.0);
        writer.write_sample((clamped * i16::MAX as f32) as i16)?;
    }
    writer.finalize()?;
    Ok(())
}
