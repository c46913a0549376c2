//! # Microphone Capture Pipeline
//!
//! Acquires the input device and emits 16kHz mono `AudioFrame`s while a
//! session is active.
//!
//! ## Lifecycle:
//! 1. **acquire**: open and start the device stream (fails with `DeviceAccessError`)
//! 2. **start**: wire a `FrameSink`; frames flow from this point on
//! 3. **release**: stop the stream and join the capture thread
//!
//! ## Thread Model:
//! `cpal::Stream` is not `Send`, so the stream lives on a dedicated thread and
//! only completed frames cross over, through a channel with room for a single
//! frame. A lagging consumer costs dropped frames, never a blocked callback.

use crate::audio::device::{choose_stream_config, find_device, DeviceAccessError, Direction};
use crate::audio::frame::{downmix, AudioFrame, CaptureSpec, FrameChunker, LinearResampler};
use cpal::traits::{DeviceTrait, StreamTrait};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::thread;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};

/// Source of microphones. One implementation per platform backend; tests
/// provide their own.
pub trait AudioInput: Send + Sync {
    fn acquire(&self, spec: &CaptureSpec) -> Result<Box<dyn Microphone>, DeviceAccessError>;
}

/// An acquired, running input device.
pub trait Microphone: Send {
    /// Start forwarding frames into `sink`. Frames produced before this call
    /// are discarded.
    fn start(&mut self, sink: FrameSink);

    /// Stop capturing and release the device. Idempotent, and complete by the
    /// time it returns.
    fn release(&mut self);
}

/// Delivery end of the outbound frame channel.
#[derive(Debug, Clone)]
pub struct FrameSink {
    tx: mpsc::Sender<AudioFrame>,
    dropped: Arc<AtomicU64>,
}

impl FrameSink {
    pub fn new(tx: mpsc::Sender<AudioFrame>, dropped: Arc<AtomicU64>) -> Self {
        Self { tx, dropped }
    }

    /// Hand a frame to the transport path without blocking.
    ///
    /// Returns `false` if the frame was dropped.
    pub fn deliver(&self, frame: AudioFrame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(frame)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("Outbound path busy, dropped capture frame {}", frame.seq());
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// Device samples in, fixed outbound frames out.
///
/// Down-mixes to mono, resamples to the target rate and cuts frames.
#[derive(Debug)]
pub struct CapturePipeline {
    device_channels: usize,
    resampler: LinearResampler,
    chunker: FrameChunker,
    scratch: Vec<f32>,
}

impl CapturePipeline {
    pub fn new(device_rate: u32, device_channels: u16, spec: &CaptureSpec) -> Self {
        Self {
            device_channels: device_channels.max(1) as usize,
            resampler: LinearResampler::new(device_rate, spec.sample_rate),
            chunker: FrameChunker::new(spec.frame_size, spec.sample_rate),
            scratch: Vec::new(),
        }
    }

    /// Feed one interleaved callback block.
    pub fn process(&mut self, interleaved: &[f32]) -> Vec<AudioFrame> {
        let mono = downmix(interleaved, self.device_channels);
        self.scratch.clear();
        self.resampler.process(&mono, &mut self.scratch);
        self.chunker.push_f32(&self.scratch)
    }
}

/// Microphones backed by the default cpal host.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalInput;

impl AudioInput for CpalInput {
    fn acquire(&self, spec: &CaptureSpec) -> Result<Box<dyn Microphone>, DeviceAccessError> {
        let microphone = CpalMicrophone::open(spec)?;
        Ok(Box::new(microphone))
    }
}

type SinkSlot = Arc<Mutex<Option<FrameSink>>>;

/// A running cpal input stream parked on its own thread.
pub struct CpalMicrophone {
    device_name: String,
    sink: SinkSlot,
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl CpalMicrophone {
    /// Open the device and start its stream.
    ///
    /// Returns only after the stream is playing or has failed to build, so a
    /// denied device surfaces here rather than later in the session.
    pub fn open(spec: &CaptureSpec) -> Result<Self, DeviceAccessError> {
        let host = cpal::default_host();
        let device = find_device(&host, Direction::Input, spec.device.as_deref())?;
        let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());

        let ranges = device
            .supported_input_configs()
            .map_err(|e| DeviceAccessError::UnsupportedConfig(e.to_string()))?;
        let fallback = device
            .default_input_config()
            .map_err(|e| DeviceAccessError::UnsupportedConfig(e.to_string()))?;
        let supported = choose_stream_config(ranges, fallback, spec.sample_rate, spec.channels);

        let sample_format = supported.sample_format();
        let config: cpal::StreamConfig = supported.config();
        let pipeline = CapturePipeline::new(config.sample_rate.0, config.channels, spec);

        info!(
            "Opening microphone '{}' at {} Hz / {} ch ({:?}), framing to {} Hz",
            device_name, config.sample_rate.0, config.channels, sample_format, spec.sample_rate
        );

        let sink: SinkSlot = Arc::new(Mutex::new(None));
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), DeviceAccessError>>();

        let thread_sink = sink.clone();
        let thread = thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || {
                run_capture_thread(device, config, sample_format, pipeline, thread_sink, ready_tx, stop_rx);
            })
            .map_err(|e| DeviceAccessError::Stream(format!("failed to spawn capture thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                device_name,
                sink,
                stop_tx: Some(stop_tx),
                thread: Some(thread),
            }),
            Ok(Err(err)) => {
                let _ = thread.join();
                Err(err)
            }
            Err(_) => {
                let _ = thread.join();
                Err(DeviceAccessError::Stream("capture thread exited during startup".to_string()))
            }
        }
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

impl Microphone for CpalMicrophone {
    fn start(&mut self, sink: FrameSink) {
        if let Ok(mut slot) = self.sink.lock() {
            *slot = Some(sink);
        }
        debug!("Microphone '{}' wired to outbound path", self.device_name);
    }

    fn release(&mut self) {
        if let Ok(mut slot) = self.sink.lock() {
            slot.take();
        }
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Capture thread for '{}' panicked", self.device_name);
            }
            info!("Released microphone '{}'", self.device_name);
        }
    }
}

impl Drop for CpalMicrophone {
    fn drop(&mut self) {
        self.release();
    }
}

fn run_capture_thread(
    device: cpal::Device,
    config: cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    pipeline: CapturePipeline,
    sink: SinkSlot,
    ready_tx: std_mpsc::Sender<Result<(), DeviceAccessError>>,
    stop_rx: std_mpsc::Receiver<()>,
) {
    let stream = match build_input_stream(&device, &config, sample_format, pipeline, sink) {
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

    debug!("Capture thread running");
    // Returns on stop() or when the microphone handle is dropped.
    let _ = stop_rx.recv();
    drop(stream);
    debug!("Capture thread stopped");
}

fn build_input_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    mut pipeline: CapturePipeline,
    sink: SinkSlot,
) -> Result<cpal::Stream, DeviceAccessError> {
    let err_fn = |err| error!("Microphone stream error: {}", err);

    let mut on_block = move |samples: &[f32]| {
        let Ok(slot) = sink.lock() else {
            return;
        };
        let Some(sink) = slot.as_ref() else {
            return;
        };
        for frame in pipeline.process(samples) {
            sink.deliver(frame);
        }
    };

    let stream = match sample_format {
        cpal::SampleFormat::F32 => device.build_input_stream(
            config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| on_block(data),
            err_fn,
            None,
        ),
        cpal::SampleFormat::I16 => device.build_input_stream(
            config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let samples: Vec<f32> = data.iter().map(|&s| s as f32 / 32768.0).collect();
                on_block(&samples);
            },
            err_fn,
            None,
        ),
        cpal::SampleFormat::U16 => device.build_input_stream(
            config,
            move |data: &[u16], _: &cpal::InputCallbackInfo| {
                let samples: Vec<f32> = data
                    .iter()
                    .map(|&s| (s as f32 - 32768.0) / 32768.0)
                    .collect();
                on_block(&samples);
            },
            err_fn,
            None,
        ),
        other => {
            return Err(DeviceAccessError::UnsupportedConfig(format!(
                "unsupported input sample format: {:?}",
                other
            )));
        }
    };

    stream.map_err(|e| DeviceAccessError::Stream(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::frame::{FRAME_SIZE, INPUT_SAMPLE_RATE};

    #[test]
    fn test_pipeline_frames_48k_stereo_into_16k_mono() {
        let spec = CaptureSpec::default();
        let mut pipeline = CapturePipeline::new(48_000, 2, &spec);

        // One second of stereo audio in 10ms callbacks.
        let block: Vec<f32> = (0..480).flat_map(|_| [0.25f32, 0.25f32]).collect();
        let mut frames = Vec::new();
        for _ in 0..100 {
            frames.extend(pipeline.process(&block));
        }

        // 16000 samples → three full 4096-sample frames.
        assert_eq!(frames.len(), INPUT_SAMPLE_RATE as usize / FRAME_SIZE);
        assert!(frames.iter().all(|f| f.len() == FRAME_SIZE));
        assert!(frames.iter().all(|f| f.sample_rate() == INPUT_SAMPLE_RATE));
        assert!(frames[0].samples().iter().all(|&s| s == 8192));
    }

    #[test]
    fn test_sink_drops_when_consumer_lags() {
        let (tx, mut rx) = mpsc::channel(1);
        let dropped = Arc::new(AtomicU64::new(0));
        let sink = FrameSink::new(tx, dropped.clone());

        assert!(sink.deliver(AudioFrame::new(0, INPUT_SAMPLE_RATE, vec![0; 4])));
        assert!(!sink.deliver(AudioFrame::new(1, INPUT_SAMPLE_RATE, vec![0; 4])));
        assert_eq!(dropped.load(Ordering::Relaxed), 1);

        assert_eq!(rx.try_recv().unwrap().seq(), 0);
        assert!(sink.deliver(AudioFrame::new(2, INPUT_SAMPLE_RATE, vec![0; 4])));
        assert_eq!(rx.try_recv().unwrap().seq(), 2);
    }
}
