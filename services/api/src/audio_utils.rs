use base64::Engine;
use hound::{SampleFormat, WavSpec, WavWriter};
use std::io::Cursor;

// Sample rate of model speech
pub const GEMINI_LIVE_OUTPUT_SAMPLE_RATE: u32 = 24000;

/// WAV layout of model speech: mono, 16-bit, 24 kHz.
pub fn output_wav_spec() -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate: GEMINI_LIVE_OUTPUT_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

/// Wraps little-endian PCM16 bytes in an in-memory WAV container.
/// A trailing odd byte cannot form a sample and is dropped.
pub fn pcm16_to_wav(pcm: &[u8], spec: WavSpec) -> Result<Vec<u8>, hound::Error> {
    let mut cursor = Cursor::new(Vec::with_capacity(pcm.len() + 44));
    {
        let mut writer = WavWriter::new(&mut cursor, spec)?;
        let sample_count = (pcm.len() / 2) as u32;
        if sample_count > 0 {
            let mut samples = writer.get_i16_writer(sample_count);
            for chunk in pcm.chunks_exact(2) {
                samples.write_sample(i16::from_le_bytes([chunk[0], chunk[1]]));
            }
            samples.flush()?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

pub fn encode_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub fn decode_base64(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    base64::engine::general_purpose::STANDARD.decode(encoded)
}
