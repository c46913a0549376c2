//! # Speaker Output
//!
//! cpal-backed implementation of the playback clock. A software `Mixer` is
//! rendered from the device callback: the clock is the number of frames the
//! device has consumed, and each scheduled buffer becomes a voice that starts
//! on an exact frame.

use crate::audio::codec::PlayableBuffer;
use crate::audio::device::{choose_stream_config, find_device, DeviceAccessError, Direction};
use crate::audio::playback::{AudioOutput, OutputDevice, SourceId};
use cpal::traits::{DeviceTrait, StreamTrait};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::thread;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

struct Voice {
    id: SourceId,
    samples: Vec<f32>,
    start_frame: u64,
    /// Source samples advanced per device frame.
    step: f64,
}

impl Voice {
    fn sample_at(&self, clock: u64) -> Option<f32> {
        if clock < self.start_frame {
            return Some(0.0);
        }
        let position = (clock - self.start_frame) as f64 * self.step;
        let index = position.floor() as usize;
        let current = *self.samples.get(index)?;
        let next = self.samples.get(index + 1).copied().unwrap_or(current);
        let frac = (position - index as f64) as f32;
        Some(current * (1.0 - frac) + next * frac)
    }

    fn finished_by(&self, clock: u64) -> bool {
        clock >= self.start_frame
            && (clock - self.start_frame) as f64 * self.step >= self.samples.len() as f64
    }
}

/// Sums scheduled voices into interleaved device frames.
pub struct Mixer {
    device_rate: u32,
    channels: usize,
    rendered: u64,
    voices: Vec<Voice>,
    ended: mpsc::UnboundedSender<SourceId>,
}

impl Mixer {
    pub fn new(device_rate: u32, channels: u16, ended: mpsc::UnboundedSender<SourceId>) -> Self {
        Self {
            device_rate: device_rate.max(1),
            channels: channels.max(1) as usize,
            rendered: 0,
            voices: Vec::new(),
            ended,
        }
    }

    /// Seconds of audio the device has consumed.
    pub fn now(&self) -> f64 {
        self.rendered as f64 / self.device_rate as f64
    }

    pub fn add(&mut self, id: SourceId, buffer: PlayableBuffer, start_at: f64) {
        let start_frame = (start_at.max(0.0) * self.device_rate as f64).round() as u64;
        let step = buffer.sample_rate() as f64 / self.device_rate as f64;
        self.voices.push(Voice {
            id,
            samples: buffer.to_mono(),
            start_frame,
            step,
        });
    }

    pub fn remove(&mut self, id: SourceId) {
        self.voices.retain(|voice| voice.id != id);
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    /// Fill one interleaved device buffer and report voices that ran out.
    pub fn render(&mut self, out: &mut [f32]) {
        let frames = out.len() / self.channels;
        for (offset, frame) in out.chunks_exact_mut(self.channels).enumerate() {
            let clock = self.rendered + offset as u64;
            let mixed: f32 = self
                .voices
                .iter()
                .filter_map(|voice| voice.sample_at(clock))
                .sum();
            frame.fill(mixed.clamp(-1.0, 1.0));
        }
        self.rendered += frames as u64;

        let rendered = self.rendered;
        let ended = &self.ended;
        self.voices.retain(|voice| {
            if voice.finished_by(rendered) {
                let _ = ended.send(voice.id);
                false
            } else {
                true
            }
        });
    }
}

/// Output clocks on the default cpal host.
#[derive(Debug, Default, Clone)]
pub struct CpalOutputDevice {
    device: Option<String>,
}

impl CpalOutputDevice {
    /// `device` is a name substring, or `None` for the host default.
    pub fn new(device: Option<String>) -> Self {
        Self { device }
    }
}

impl OutputDevice for CpalOutputDevice {
    fn open(
        &self,
        sample_rate: u32,
        ended: mpsc::UnboundedSender<SourceId>,
    ) -> Result<Box<dyn AudioOutput>, DeviceAccessError> {
        let output = CpalOutput::open(self.device.as_deref(), sample_rate, ended)?;
        Ok(Box::new(output))
    }
}

/// A running speaker stream, parked on its own thread.
pub struct CpalOutput {
    mixer: Arc<Mutex<Mixer>>,
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl CpalOutput {
    pub fn open(
        device_name: Option<&str>,
        sample_rate: u32,
        ended: mpsc::UnboundedSender<SourceId>,
    ) -> Result<Self, DeviceAccessError> {
        let host = cpal::default_host();
        let device = find_device(&host, Direction::Output, device_name)?;

        let ranges = device
            .supported_output_configs()
            .map_err(|e| DeviceAccessError::UnsupportedConfig(e.to_string()))?;
        let fallback = device
            .default_output_config()
            .map_err(|e| DeviceAccessError::UnsupportedConfig(e.to_string()))?;
        let supported = choose_stream_config(ranges, fallback, sample_rate, 1);

        let sample_format = supported.sample_format();
        let config: cpal::StreamConfig = supported.config();
        info!(
            "Opening speaker '{}' at {} Hz / {} ch ({:?})",
            device.name().unwrap_or_else(|_| "unknown".to_string()),
            config.sample_rate.0,
            config.channels,
            sample_format
        );

        let mixer = Arc::new(Mutex::new(Mixer::new(
            config.sample_rate.0,
            config.channels,
            ended,
        )));
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), DeviceAccessError>>();

        let thread_mixer = mixer.clone();
        let thread = thread::Builder::new()
            .name("speaker-playback".to_string())
            .spawn(move || {
                run_playback_thread(device, config, sample_format, thread_mixer, ready_tx, stop_rx);
            })
            .map_err(|e| DeviceAccessError::Stream(format!("failed to spawn playback thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                mixer,
                stop_tx: Some(stop_tx),
                thread: Some(thread),
            }),
            Ok(Err(err)) => {
                let _ = thread.join();
                Err(err)
            }
            Err(_) => {
                let _ = thread.join();
                Err(DeviceAccessError::Stream("playback thread exited during startup".to_string()))
            }
        }
    }

    fn with_mixer<R>(&self, f: impl FnOnce(&mut Mixer) -> R) -> Option<R> {
        match self.mixer.lock() {
            Ok(mut mixer) => Some(f(&mut mixer)),
            Err(_) => {
                warn!("Mixer lock poisoned");
                None
            }
        }
    }
}

impl AudioOutput for CpalOutput {
    fn now(&self) -> f64 {
        self.with_mixer(|mixer| mixer.now()).unwrap_or(0.0)
    }

    fn schedule(&mut self, id: SourceId, buffer: PlayableBuffer, start_at: f64) {
        self.with_mixer(|mixer| mixer.add(id, buffer, start_at));
    }

    fn stop(&mut self, id: SourceId) {
        self.with_mixer(|mixer| mixer.remove(id));
    }

    fn close(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Playback thread panicked");
            }
            debug!("Speaker stream closed");
        }
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_playback_thread(
    device: cpal::Device,
    config: cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    mixer: Arc<Mutex<Mixer>>,
    ready_tx: std_mpsc::Sender<Result<(), DeviceAccessError>>,
    stop_rx: std_mpsc::Receiver<()>,
) {
    let stream = match build_output_stream(&device, &config, sample_format, mixer) {
        Ok(stream) => stream,
        Err(err) => {
            let _ = ready_tx.send(Err(err));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(DeviceAccessError::Stream(e.to_string())));
        return;
    }
    let _ = ready_tx.send(Ok(()));

    let _ = stop_rx.recv();
    drop(stream);
}

/// Render into `out`, leaving silence where the mixer writes nothing.
///
/// Runs on the device callback, so it never allocates.
fn render_into(mixer: &Mutex<Mixer>, out: &mut [f32]) {
    out.fill(0.0);
    if let Ok(mut mixer) = mixer.lock() {
        mixer.render(out);
    }
}

/// Borrow `len` samples of a buffer that only grows.
fn scratch_slice(scratch: &mut Vec<f32>, len: usize) -> &mut [f32] {
    if scratch.len() < len {
        scratch.resize(len, 0.0);
    }
    &mut scratch[..len]
}

fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    mixer: Arc<Mutex<Mixer>>,
) -> Result<cpal::Stream, DeviceAccessError> {
    let err_fn = |err| error!("Speaker stream error: {}", err);

    let stream = match sample_format {
        cpal::SampleFormat::F32 => device.build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                render_into(&mixer, data);
            },
            err_fn,
            None,
        ),
        cpal::SampleFormat::I16 => {
            let mut scratch: Vec<f32> = Vec::new();
            device.build_output_stream(
                config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    let mixed = scratch_slice(&mut scratch, data.len());
                    render_into(&mixer, mixed);
                    for (out, sample) in data.iter_mut().zip(mixed.iter()) {
                        *out = (sample * i16::MAX as f32) as i16;
                    }
                },
                err_fn,
                None,
            )
        }
        cpal::SampleFormat::U16 => {
            let mut scratch: Vec<f32> = Vec::new();
            device.build_output_stream(
                config,
                move |data: &mut [u16], _: &cpal::OutputCallbackInfo| {
                    let mixed = scratch_slice(&mut scratch, data.len());
                    render_into(&mixer, mixed);
                    for (out, sample) in data.iter_mut().zip(mixed.iter()) {
                        *out = ((sample * 32767.0) + 32768.0) as u16;
                    }
                },
                err_fn,
                None,
            )
        }
        other => {
            return Err(DeviceAccessError::UnsupportedConfig(format!(
                "unsupported output sample format: {:?}",
                other
            )));
        }
    };

    stream.map_err(|e| DeviceAccessError::Stream(e.to_string()))
}
