//! WAV encoding and decoding.

use std::io::{Cursor, Read};

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::error::Result;

use super::sampler::SampleBuffer;

/// Encode a stereo float signal as a 16-bit PCM WAV file.
///
/// Samples are clamped to [-1, 1]; the shorter channel sets the length.
pub fn encode_wav(left: &[f32], right: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut bytes = Vec::new();
    let mut writer = WavWriter::new(Cursor::new(&mut bytes), spec)?;
    for (l, r) in left.iter().zip(right) {
        writer.write_sample(to_i16(*l))?;
        writer.write_sample(to_i16(*r))?;
    }
    writer.finalize()?;
    Ok(bytes)
}

fn to_i16(s: f32) -> i16 {
    (s.clamp(-1.0, 1.0) * 32767.0).round() as i16
}

/// Decode any PCM or float WAV into a mono sample buffer.
pub fn decode_wav<R: Read>(source: R) -> Result<SampleBuffer> {
    let mut reader = WavReader::new(source)?;
    let spec = reader.spec();

    let interleaved: Vec<f64> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map(f64::from))
            .collect::<std::result::Result<_, _>>()?,
        SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.max(1) - 1)) as f64;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f64 / scale))
                .collect::<std::result::Result<_, _>>()?
        }
    };

    Ok(SampleBuffer::from_interleaved(
        &interleaved,
        spec.channels,
        spec.sample_rate,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_describes_16_bit_stereo() {
        let bytes = encode_wav(&[0.0; 10], &[0.0; 10], 22050).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        assert_eq!(bytes.len(), 44 + 10 * 2 * 2);

        let reader = WavReader::new(Cursor::new(bytes)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 22050);
        assert_eq!(spec.bits_per_sample, 16);
    }

    #[test]
    fn out_of_range_samples_clamp() {
        assert_eq!(to_i16(2.0), 32767);
        assert_eq!(to_i16(-2.0), -32767);
        assert_eq!(to_i16(0.0), 0);
    }

    #[test]
    fn decoded_stereo_is_mono_average() {
        let bytes = encode_wav(&[0.5, 0.5], &[0.0, -0.5], 44100).unwrap();
        let buf = decode_wav(Cursor::new(bytes)).unwrap();
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.sample_rate, 44100);
        assert!((buf.data[0] - 0.25).abs() < 1e-3, "{:?}", buf.data);
        assert!(buf.data[1].abs() < 1e-3, "{:?}", buf.data);
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(decode_wav(Cursor::new(b"not a wav".to_vec())).is_err());
    }
}
