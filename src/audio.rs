//! Microphone capture. Wraps the system input device so the rest of the app can
//! ask for "speech-ready" samples without touching cpal or thinking about
//! sample rates.

use crate::log_debug;
use anyhow::{anyhow, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
#[cfg(feature = "high-quality-audio")]
use rubato::{InterpolationParameters, InterpolationType, Resampler, SincFixedIn, WindowFunction};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Target format for transcription (mono channel, 16 kHz sample rate).
/// The Whisper model requires mono audio at 16 kHz for accurate transcription.
pub const TARGET_RATE: u32 = 16_000;
pub const TARGET_CHANNELS: u32 = 1;

/// How often the capture loop checks the stop flag while the stream runs.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[cfg(feature = "high-quality-audio")]
static RESAMPLER_WARNING_SHOWN: AtomicBool = AtomicBool::new(false);

/// Owns the input device chosen at startup; constructing one is the capture
/// capability probe.
pub struct Recorder {
    device: cpal::Device,
}

impl Recorder {
    /// List microphone names so the CLI can expose a human-friendly selector.
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host.input_devices().context("no input devices available")?;
        let mut names = Vec::new();
        for device in devices {
            if let Ok(name) = device.name() {
                names.push(name);
            }
        }
        Ok(names)
    }

    /// Create a recorder, optionally forcing a specific device so users can pick
    /// the right microphone when a laptop exposes multiple inputs.
    pub fn new(preferred_device: Option<&str>) -> Result<Self> {
        let host = cpal::default_host();
        let device = match preferred_device {
            Some(name) => {
                let mut devices = host.input_devices().context("no input devices available")?;
                devices
                    .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                    .ok_or_else(|| anyhow!("input device '{name}' not found"))?
            }
            None => host
                .default_input_device()
                .context("no default input device available")?,
        };
        Ok(Self { device })
    }

    /// Get the name of the active recording device.
    pub fn device_name(&self) -> String {
        self.device
            .name()
            .unwrap_or_else(|_| "Unknown Device".to_string())
    }

    /// Record for up to `seconds`, normalize the incoming format, and return
    /// 16 kHz mono data that Whisper can consume directly. Setting `stop`
    /// truncates the window early; whatever was captured so far is returned.
    pub fn record(&self, seconds: u64, stop: &AtomicBool) -> Result<Vec<f32>> {
        // Get the device's default config so we know the native format and channel count.
        let default_config = self.device.default_input_config()?;
        let format = default_config.sample_format();
        let device_config: StreamConfig = default_config.clone().into();
        let device_sample_rate = device_config.sample_rate.0;
        let channels = usize::from(device_config.channels.max(1));
        let device_name = self
            .device
            .name()
            .unwrap_or_else(|_| "unknown input device".to_string());

        log_debug(&format!(
            "Recorder config: format={format:?} sample_rate={device_sample_rate}Hz channels={channels}"
        ));

        // cpal delivers samples on a callback thread; collect them in a shared
        // buffer so we can keep ownership on the caller side.
        let buffer = Arc::new(Mutex::new(Vec::<f32>::new()));
        let buffer_clone = buffer.clone();

        // Keep the error callback quiet in the UI and mirror issues into the log.
        let err_fn = |err| log_debug(&format!("audio_stream_error: {err}"));

        // Convert every supported sample type to f32 up front so the rest of the
        // pipeline can stay format-agnostic.
        let stream = match format {
            SampleFormat::F32 => self.device.build_input_stream(
                &device_config,
                move |data: &[f32], _| {
                    if let Ok(mut buf) = buffer_clone.lock() {
                        append_downmixed_samples(&mut buf, data, channels, |sample| sample);
                    }
                },
                err_fn,
                None,
            )?,
            SampleFormat::I16 => self.device.build_input_stream(
                &device_config,
                move |data: &[i16], _| {
                    if let Ok(mut buf) = buffer_clone.lock() {
                        append_downmixed_samples(&mut buf, data, channels, |sample| {
                            sample as f32 / 32_768.0_f32
                        });
                    }
                },
                err_fn,
                None,
            )?,
            SampleFormat::U16 => self.device.build_input_stream(
                &device_config,
                move |data: &[u16], _| {
                    if let Ok(mut buf) = buffer_clone.lock() {
                        append_downmixed_samples(&mut buf, data, channels, |sample| {
                            (sample as f32 - 32_768.0_f32) / 32_768.0_f32
                        });
                    }
                },
                err_fn,
                None,
            )?,
            other => return Err(anyhow!("unsupported sample format: {other:?}")),
        };

        stream.play()?;
        let deadline = Instant::now() + Duration::from_secs(seconds);
        while Instant::now() < deadline && !stop.load(Ordering::Acquire) {
            std::thread::sleep(STOP_POLL_INTERVAL);
        }
        if let Err(err) = stream.pause() {
            log_debug(&format!("failed to pause audio stream: {err}"));
        }
        drop(stream);

        let samples = buffer.lock().unwrap_or_else(|e| e.into_inner());

        if samples.is_empty() {
            if stop.load(Ordering::Acquire) {
                // Stopped before the stream produced anything; not an error.
                return Ok(Vec::new());
            }
            return Err(anyhow!(
                "no samples captured from '{device_name}'; check microphone permissions and availability"
            ));
        }

        // Transcription assumes 16 kHz mono, so resample if the hardware rate differs.
        Ok(resample_to_target_rate(&samples, device_sample_rate))
    }
}

fn append_downmixed_samples<T, F>(buf: &mut Vec<f32>, data: &[T], channels: usize, mut convert: F)
where
    T: Copy,
    F: FnMut(T) -> f32,
{
    if channels <= 1 {
        buf.extend(data.iter().copied().map(&mut convert));
        return;
    }

    // Average each interleaved frame to produce a mono representation.
    let mut acc = 0.0f32;
    let mut count = 0usize;
    for sample in data.iter().copied() {
        acc += convert(sample);
        count += 1;
        if count == channels {
            buf.push(acc / channels as f32);
            acc = 0.0;
            count = 0;
        }
    }
    if count > 0 {
        buf.push(acc / count as f32);
    }
}

#[cfg(feature = "high-quality-audio")]
fn resample_to_target_rate(input: &[f32], device_rate: u32) -> Vec<f32> {
    if device_rate == 0 || input.is_empty() || device_rate == TARGET_RATE {
        return input.to_vec();
    }

    match resample_with_rubato(input, device_rate) {
        Ok(output) => output,
        Err(err) => {
            if !RESAMPLER_WARNING_SHOWN.swap(true, Ordering::AcqRel) {
                log_debug(&format!(
                    "high-quality resampler failed ({err}); falling back to basic path"
                ));
            }
            resample_linear(input, TARGET_RATE as f32 / device_rate as f32)
        }
    }
}

#[cfg(not(feature = "high-quality-audio"))]
fn resample_to_target_rate(input: &[f32], device_rate: u32) -> Vec<f32> {
    if device_rate == 0 || input.is_empty() || device_rate == TARGET_RATE {
        return input.to_vec();
    }
    resample_linear(input, TARGET_RATE as f32 / device_rate as f32)
}

#[cfg(feature = "high-quality-audio")]
fn resample_with_rubato(input: &[f32], device_rate: u32) -> Result<Vec<f32>> {
    let ratio = TARGET_RATE as f64 / device_rate as f64;
    let chunk = 256usize;
    let params = InterpolationParameters {
        sinc_len: 64,
        f_cutoff: 0.90,
        interpolation: InterpolationType::Cubic,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut rs = SincFixedIn::<f32>::new(ratio, 2.0, params, chunk, 1)
        .map_err(|e| anyhow!("failed to construct sinc resampler: {e:?}"))?;

    let expect = ((input.len() as u64) * TARGET_RATE as u64 / device_rate as u64) as usize + 8;
    let mut out = Vec::with_capacity(expect);

    let mut idx = 0usize;
    let mut seg = vec![0.0f32; chunk];
    while idx < input.len() {
        let end = (idx + chunk).min(input.len());
        let len = end - idx;
        seg[..len].copy_from_slice(&input[idx..end]);
        if len < chunk {
            let pad = seg.get(len.wrapping_sub(1)).copied().unwrap_or(0.0);
            for s in &mut seg[len..] {
                *s = pad;
            }
        }
        let produced = rs
            .process(std::slice::from_ref(&seg), None)
            .map_err(|e| anyhow!("resampler process failed: {e:?}"))?;
        out.extend_from_slice(&produced[0]);
        idx = end;
    }

    if out.len() > expect {
        out.truncate(expect);
    } else if out.len() < expect {
        out.resize(expect, *out.last().unwrap_or(&0.0));
    }
    Ok(out)
}

fn resample_linear(input: &[f32], ratio: f32) -> Vec<f32> {
    let input_len = input.len();
    let output_len = (input_len as f32 * ratio).round() as usize;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let src_idx = i as f32 / ratio;
        let idx = src_idx.floor() as usize;
        let frac = src_idx - idx as f32;

        if idx + 1 < input_len {
            let sample = input[idx] * (1.0 - frac) + input[idx + 1] * frac;
            output.push(sample);
        } else if idx < input_len {
            output.push(input[idx]);
        } else {
            let pad = input.last().copied().unwrap_or(0.0);
            output.push(pad);
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_preserves_mono_input() {
        let mut buf = Vec::new();
        append_downmixed_samples(&mut buf, &[0.25f32, -0.5, 1.0], 1, |s| s);
        assert_eq!(buf, vec![0.25, -0.5, 1.0]);
    }

    #[test]
    fn downmix_averages_stereo_frames() {
        let mut buf = Vec::new();
        append_downmixed_samples(&mut buf, &[1.0f32, 0.0, -1.0, 1.0], 2, |s| s);
        assert_eq!(buf, vec![0.5, 0.0]);
    }

    #[test]
    fn downmix_handles_partial_final_frame() {
        let mut buf = Vec::new();
        append_downmixed_samples(&mut buf, &[1.0f32, 1.0, 0.5], 2, |s| s);
        assert_eq!(buf.len(), 2);
        assert!((buf[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn downmix_converts_sample_types() {
        let mut buf = Vec::new();
        append_downmixed_samples(&mut buf, &[i16::MAX, 0], 1, |s| s as f32 / 32_768.0);
        assert!((buf[0] - 0.99997).abs() < 1e-3);
        assert_eq!(buf[1], 0.0);
    }

    #[test]
    fn resample_linear_scales_length() {
        let input = vec![0.0f32, 1.0, 2.0, 3.0];
        let result = resample_linear(&input, 0.5);
        assert!(result.len() < input.len());
        assert!((result.first().copied().unwrap_or_default() - 0.0).abs() < 1e-6);
    }

    #[test]
    fn resample_to_target_rate_passes_native_rate_through() {
        let input = vec![0.1f32, 0.2, 0.3];
        assert_eq!(resample_to_target_rate(&input, TARGET_RATE), input);
    }

    #[test]
    fn resample_to_target_rate_shrinks_48k_input() {
        let input: Vec<f32> = (0..960).map(|i| (i as f32 * 0.01).sin()).collect();
        let result = resample_to_target_rate(&input, 48_000);
        let expected = (input.len() as f64 * f64::from(TARGET_RATE) / 48_000f64).round() as usize;
        let diff = (result.len() as isize - expected as isize).abs();
        // Chunked resampling can introduce a few extra samples on some hosts.
        assert!(
            diff <= 10,
            "expected about {expected} samples, got {}",
            result.len()
        );
    }

    #[test]
    fn resample_to_target_rate_guards_zero_rate() {
        let input = vec![0.5f32; 4];
        assert_eq!(resample_to_target_rate(&input, 0), input);
    }
}
