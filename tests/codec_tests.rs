// Tests for the PCM16 codec and the sample-rate helpers
//
// Encoding truncates toward zero and saturates; decoding divides by 32768.

use loqa_voice::audio::codec::{downmix, resample_linear};
use loqa_voice::audio::{float_to_pcm16, pcm16_to_float, EncodedChunk};
use loqa_voice::CallError;

#[test]
fn test_round_trip_within_one_step() {
    let samples: Vec<f32> = (0..=200).map(|i| -1.0 + i as f32 * 0.01).collect();

    let bytes = float_to_pcm16(&samples);
    assert_eq!(bytes.len(), samples.len() * 2);

    let decoded = pcm16_to_float(&bytes, 16000, 1).unwrap();
    assert_eq!(decoded.samples.len(), samples.len());

    for (original, restored) in samples.iter().zip(decoded.samples.iter()) {
        assert!(
            (original - restored).abs() <= 1.0 / 32768.0 + 1e-6,
            "{} came back as {}",
            original,
            restored
        );
    }
}

#[test]
fn test_round_trip_dense_sweep() {
    // Edges, values around zero and a fixed-seed pseudo-random spread over [-1, 1]
    let mut samples = vec![-1.0, 1.0, 0.0, -0.0, 1e-6, -1e-6, 1.0 / 32768.0, -1.0 / 32768.0];
    samples.extend((1..=64).map(|i| i as f32 * 1e-5));
    samples.extend((1..=64).map(|i| i as f32 * -1e-5));

    let mut seed: u32 = 0x2545_f491;
    for _ in 0..20_000 {
        seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        samples.push((seed >> 8) as f32 / (1u32 << 24) as f32 * 2.0 - 1.0);
    }

    let decoded = pcm16_to_float(&float_to_pcm16(&samples), 24000, 1).unwrap();
    assert_eq!(decoded.samples.len(), samples.len());

    for (original, restored) in samples.iter().zip(decoded.samples.iter()) {
        assert!((-1.0..=1.0).contains(restored));
        assert!(
            (original - restored).abs() <= 1.0 / 32768.0 + 1e-6,
            "{} came back as {}",
            original,
            restored
        );
        // Truncation never moves a sample away from zero
        assert!(restored.abs() <= original.abs() + 1e-7);
    }
}

#[test]
fn test_known_values_little_endian() {
    let bytes = float_to_pcm16(&[0.0, 0.5, -0.5, -1.0]);

    assert_eq!(&bytes[0..2], &0i16.to_le_bytes());
    assert_eq!(&bytes[2..4], &16384i16.to_le_bytes());
    assert_eq!(&bytes[4..6], &(-16384i16).to_le_bytes());
    assert_eq!(&bytes[6..8], &(-32768i16).to_le_bytes());
}

#[test]
fn test_truncates_toward_zero() {
    // 0.00005 * 32768 = 1.6384 -> 1, -1.6384 -> -1
    let bytes = float_to_pcm16(&[0.00005, -0.00005]);
    assert_eq!(&bytes[0..2], &1i16.to_le_bytes());
    assert_eq!(&bytes[2..4], &(-1i16).to_le_bytes());
}

#[test]
fn test_out_of_range_saturates() {
    let bytes = float_to_pcm16(&[1.0, 1.5, -1.5, 40.0]);

    assert_eq!(&bytes[0..2], &i16::MAX.to_le_bytes());
    assert_eq!(&bytes[2..4], &i16::MAX.to_le_bytes());
    assert_eq!(&bytes[4..6], &i16::MIN.to_le_bytes());
    assert_eq!(&bytes[6..8], &i16::MAX.to_le_bytes());
}

#[test]
fn test_odd_byte_count_is_format_error() {
    let result = pcm16_to_float(&[0u8; 7], 24000, 1);
    assert!(matches!(result, Err(CallError::Format { .. })));
}

#[test]
fn test_partial_stereo_frame_is_format_error() {
    // Three samples cannot form whole stereo frames
    let result = pcm16_to_float(&[0u8; 6], 24000, 2);
    assert!(matches!(result, Err(CallError::Format { .. })));
}

#[test]
fn test_empty_payload_decodes_to_empty_buffer() {
    let decoded = pcm16_to_float(&[], 24000, 1).unwrap();
    assert!(decoded.is_empty());
    assert_eq!(decoded.duration_secs(), 0.0);
}

#[test]
fn test_decoded_duration() {
    // 12000 samples at 24kHz = 0.5 seconds
    let decoded = pcm16_to_float(&vec![0u8; 24000], 24000, 1).unwrap();
    assert_eq!(decoded.frames(), 12000);
    assert!((decoded.duration_secs() - 0.5).abs() < 1e-9);
}

#[test]
fn test_stereo_decode_and_downmix() {
    let bytes = float_to_pcm16(&[0.5, 0.0, -0.5, -0.5]);
    let decoded = pcm16_to_float(&bytes, 48000, 2).unwrap();

    assert_eq!(decoded.frames(), 2);
    let mono = decoded.to_mono();
    assert_eq!(mono.len(), 2);
    assert!((mono[0] - 0.25).abs() < 1e-4);
    assert!((mono[1] + 0.5).abs() < 1e-4);
}

#[test]
fn test_downmix_mono_passthrough() {
    let samples = vec![0.1, 0.2, 0.3];
    assert_eq!(downmix(&samples, 1), samples);
}

#[test]
fn test_resample_changes_length_by_ratio() {
    let samples = vec![0.25f32; 48000];

    let down = resample_linear(&samples, 48000, 16000);
    assert_eq!(down.len(), 16000);
    assert!(down.iter().all(|s| (s - 0.25).abs() < 1e-6));

    let same = resample_linear(&samples[..100], 16000, 16000);
    assert_eq!(same.len(), 100);
}

#[test]
fn test_mime_type_announces_rate() {
    let chunk = EncodedChunk::mono(vec![0, 0], 16000);
    assert_eq!(chunk.mime_type(), "audio/pcm;rate=16000");
    assert_eq!(chunk.channels, 1);
}
