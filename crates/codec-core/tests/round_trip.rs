//! End-to-end quality checks on tones pushed through encode and decode.

use cellgate_codec_core::codecs::g711::{alaw_decode, alaw_encode, ulaw_decode, ulaw_encode};
use cellgate_codec_core::{CodecFactory, CodecType, Downsampler, Upsampler};
use proptest::prelude::*;

fn tone(freq: f64, rate: f64, len: usize, amplitude: f64) -> Vec<i16> {
    (0..len)
        .map(|n| (amplitude * (2.0 * std::f64::consts::PI * freq * n as f64 / rate).sin()) as i16)
        .collect()
}

/// SNR in dB of `output` against `reference` delayed by `lag`, after fitting a
/// least-squares gain.
fn snr_at_lag(reference: &[i16], output: &[i16], lag: usize, skip: usize) -> f64 {
    let pairs: Vec<(f64, f64)> = (skip..output.len())
        .filter(|&n| n >= lag && n - lag < reference.len())
        .map(|n| (f64::from(reference[n - lag]), f64::from(output[n])))
        .collect();
    let cross: f64 = pairs.iter().map(|(r, o)| r * o).sum();
    let power: f64 = pairs.iter().map(|(r, _)| r * r).sum();
    let gain = if power > 0.0 { cross / power } else { 0.0 };
    let signal: f64 = pairs.iter().map(|(r, _)| (gain * r).powi(2)).sum();
    let noise: f64 = pairs.iter().map(|(r, o)| (o - gain * r).powi(2)).sum();
    10.0 * (signal / noise.max(1e-9)).log10()
}

fn best_snr(reference: &[i16], output: &[i16], max_lag: usize, skip: usize) -> f64 {
    (0..=max_lag)
        .map(|lag| snr_at_lag(reference, output, lag, skip))
        .fold(f64::MIN, f64::max)
}

fn run_codec(codec_type: CodecType, input: &[i16]) -> Vec<i16> {
    let mut encoder = CodecFactory::create(codec_type).unwrap();
    let mut decoder = CodecFactory::create(codec_type).unwrap();
    let frame = codec_type.frame_samples();
    let mut output = Vec::with_capacity(input.len());
    for chunk in input.chunks(frame) {
        let payload = encoder.encode(chunk).unwrap();
        assert_eq!(payload.len(), chunk.len() * 160 / frame);
        output.extend(decoder.decode(&payload).unwrap());
    }
    output
}

#[test]
fn pcma_tone_quality() {
    let input = tone(1000.0, 8000.0, 1600, 8000.0);
    let output = run_codec(CodecType::G711Pcma, &input);
    assert_eq!(output.len(), input.len());
    let snr = snr_at_lag(&input, &output, 0, 0);
    assert!(snr > 30.0, "PCMA SNR {snr:.1} dB");
}

#[test]
fn pcmu_tone_quality() {
    let input = tone(1000.0, 8000.0, 1600, 8000.0);
    let output = run_codec(CodecType::G711Pcmu, &input);
    let snr = snr_at_lag(&input, &output, 0, 0);
    assert!(snr > 30.0, "PCMU SNR {snr:.1} dB");
}

#[test]
fn g722_tone_quality() {
    let input = tone(1000.0, 16000.0, 16000, 8000.0);
    let output = run_codec(CodecType::G722, &input);
    assert_eq!(output.len(), input.len());
    // 40 ms of warm-up for the adaptive predictors
    let snr = best_snr(&input, &output, 64, 640);
    assert!(snr > 15.0, "G.722 SNR {snr:.1} dB");
}

#[test]
fn resampler_round_trip_keeps_tone() {
    let input = tone(1000.0, 8000.0, 1600, 8000.0);
    let mut up = Upsampler::new();
    let mut down = Downsampler::new();
    let mut output = Vec::new();
    for chunk in input.chunks(160) {
        let wide = up.process(chunk);
        assert_eq!(wide.len(), 320);
        output.extend(down.process(&wide));
    }
    assert_eq!(output.len(), input.len());
    let snr = best_snr(&input, &output, 40, 80);
    assert!(snr > 20.0, "resampler SNR {snr:.1} dB");
}

proptest! {
    #[test]
    fn g711_decoded_levels_are_fixed_points(code in any::<u8>()) {
        let level = alaw_decode(code);
        prop_assert_eq!(alaw_decode(alaw_encode(level)), level);
        let level = ulaw_decode(code);
        prop_assert_eq!(ulaw_decode(ulaw_encode(level)), level);
    }

    #[test]
    fn g722_decodes_any_payload(payload in proptest::collection::vec(any::<u8>(), 0..480)) {
        let mut decoder = CodecFactory::create(CodecType::G722).unwrap();
        let samples = decoder.decode(&payload).unwrap();
        prop_assert_eq!(samples.len(), payload.len() * 2);
    }
}
