//! Nearest-neighbor downsampling and 16-bit PCM encoding.

use bytes::Bytes;

use super::source::AudioChunk;

/// Downsample floating-point samples by nearest-neighbor decimation.
///
/// For each output index `i` the input sample at `round(i * ratio)` is
/// selected, where `ratio = input_rate / output_rate`. No anti-alias filter
/// is applied; the selection policy is part of the output contract and must
/// not be silently upgraded to a filtering resampler.
///
/// Equal rates copy the input through unchanged. Upsampling is not
/// supported and yields an empty buffer.
pub fn downsample(samples: &[f32], input_rate: u32, output_rate: u32) -> Vec<f32> {
    if input_rate == output_rate {
        return samples.to_vec();
    }
    if output_rate > input_rate || input_rate == 0 {
        return Vec::new();
    }

    let ratio = f64::from(input_rate) / f64::from(output_rate);
    let out_len = (samples.len() as f64 / ratio) as usize;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let src = (i as f64 * ratio).round() as usize;
        if src >= samples.len() {
            break;
        }
        out.push(samples[src]);
    }
    out
}

/// Encode floating-point samples as 16-bit signed little-endian PCM.
///
/// Samples are clamped to `[-1.0, 1.0]`, scaled by `0x7FFF` for
/// non-negative values and `0x8000` for negative values, and serialized
/// little-endian. Pure and deterministic.
pub fn pcm_encode(samples: &[f32]) -> Bytes {
    let mut buf = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        let value = if clamped < 0.0 {
            (clamped * 0x8000 as f32) as i16
        } else {
            (clamped * 0x7FFF as f32) as i16
        };
        buf.extend_from_slice(&value.to_le_bytes());
    }
    Bytes::from(buf)
}

/// Downsample a captured chunk to `target_rate` and PCM-encode it.
///
/// Returns an empty buffer when the chunk would require upsampling; callers
/// must not send empty audio frames (an empty payload is the end-of-stream
/// sentinel).
pub fn encode_chunk(chunk: &AudioChunk, target_rate: u32) -> Bytes {
    if chunk.samples.is_empty() {
        return Bytes::new();
    }
    if chunk.sample_rate == target_rate {
        return pcm_encode(&chunk.samples);
    }
    pcm_encode(&downsample(&chunk.samples, chunk.sample_rate, target_rate))
}
