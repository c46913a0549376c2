//! In-memory devices and connector for driving the controller in tests.

use crate::audio::capture::{AudioInput, FrameSink, Microphone};
use crate::audio::codec::PlayableBuffer;
use crate::audio::device::{DeviceAccessError, Direction};
use crate::audio::frame::{AudioFrame, CaptureSpec};
use crate::audio::playback::{AudioOutput, OutputDevice, SourceId};
use crate::live::transport::{Connector, LiveConfig, Outbound, SessionLink, TransportEvent};
use crate::session::controller::VoiceController;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Dispatch every input that is ready, then return.
pub async fn drain(controller: &mut VoiceController) {
    while let Ok(input) = tokio::time::timeout(Duration::from_millis(20), controller.next_input()).await {
        controller.dispatch(input);
    }
}

// ── Microphone ─────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeInput {
    denied: AtomicBool,
    acquired: AtomicUsize,
    started: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
    sink: Arc<Mutex<Option<FrameSink>>>,
}

impl FakeInput {
    pub fn deny(&self) {
        self.denied.store(true, Ordering::SeqCst);
    }

    /// Push a frame as if the device produced it. `false` if not delivered.
    pub fn emit(&self, frame: AudioFrame) -> bool {
        match self.sink.lock().unwrap().as_ref() {
            Some(sink) => sink.deliver(frame),
            None => false,
        }
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl AudioInput for FakeInput {
    fn acquire(&self, _spec: &CaptureSpec) -> Result<Box<dyn Microphone>, DeviceAccessError> {
        if self.denied.load(Ordering::SeqCst) {
            return Err(DeviceAccessError::NoDefaultDevice(Direction::Input));
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeMicrophone {
            started: self.started.clone(),
            released: self.released.clone(),
            sink: self.sink.clone(),
            live: true,
        }))
    }
}

struct FakeMicrophone {
    started: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
    sink: Arc<Mutex<Option<FrameSink>>>,
    live: bool,
}

impl Microphone for FakeMicrophone {
    fn start(&mut self, sink: FrameSink) {
        self.started.fetch_add(1, Ordering::SeqCst);
        *self.sink.lock().unwrap() = Some(sink);
    }

    fn release(&mut self) {
        if self.live {
            self.live = false;
            self.released.fetch_add(1, Ordering::SeqCst);
            self.sink.lock().unwrap().take();
        }
    }
}

// ── Speaker ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub id: SourceId,
    pub start_at: f64,
    pub duration: f64,
}

#[derive(Default)]
struct OutputState {
    now: f64,
    fail_open: bool,
    opened: usize,
    closed: usize,
    scheduled: Vec<Placement>,
    stopped: Vec<SourceId>,
    playing: HashMap<SourceId, f64>,
    ended: Option<mpsc::UnboundedSender<SourceId>>,
}

/// Output device with a manually driven clock.
#[derive(Clone, Default)]
pub struct FakeOutputDevice {
    state: Arc<Mutex<OutputState>>,
}

impl FakeOutputDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_open(&self) {
        self.state.lock().unwrap().fail_open = true;
    }

    /// Move the clock without finishing any source.
    pub fn set_now(&self, now: f64) {
        self.state.lock().unwrap().now = now;
    }

    /// Move the clock forward and report sources that finished on the way.
    pub fn advance(&self, seconds: f64) {
        let mut state = self.state.lock().unwrap();
        state.now += seconds;
        let now = state.now;

        let mut finished: Vec<SourceId> = state
            .playing
            .iter()
            .filter(|(_, end)| **end <= now)
            .map(|(id, _)| *id)
            .collect();
        finished.sort();

        for id in finished {
            state.playing.remove(&id);
            if let Some(ended) = &state.ended {
                let _ = ended.send(id);
            }
        }
    }

    pub fn scheduled(&self) -> Vec<Placement> {
        self.state.lock().unwrap().scheduled.clone()
    }

    pub fn stopped(&self) -> Vec<SourceId> {
        self.state.lock().unwrap().stopped.clone()
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().unwrap().opened
    }

    pub fn closed_count(&self) -> usize {
        self.state.lock().unwrap().closed
    }
}

impl OutputDevice for FakeOutputDevice {
    fn open(
        &self,
        _sample_rate: u32,
        ended: mpsc::UnboundedSender<SourceId>,
    ) -> Result<Box<dyn AudioOutput>, DeviceAccessError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_open {
            return Err(DeviceAccessError::Stream("speaker busy".to_string()));
        }
        state.opened += 1;
        state.ended = Some(ended);
        Ok(Box::new(FakeOutput {
            state: self.state.clone(),
        }))
    }
}

struct FakeOutput {
    state: Arc<Mutex<OutputState>>,
}

impl AudioOutput for FakeOutput {
    fn now(&self) -> f64 {
        self.state.lock().unwrap().now
    }

    fn schedule(&mut self, id: SourceId, buffer: PlayableBuffer, start_at: f64) {
        let mut state = self.state.lock().unwrap();
        let duration = buffer.duration();
        state.scheduled.push(Placement {
            id,
            start_at,
            duration,
        });
        state.playing.insert(id, start_at + duration);
    }

    fn stop(&mut self, id: SourceId) {
        let mut state = self.state.lock().unwrap();
        state.playing.remove(&id);
        state.stopped.push(id);
    }

    fn close(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.closed += 1;
        state.ended = None;
    }
}

// ── Transport ──────────────────────────────────────────────────────

struct FakeConnection {
    config: LiveConfig,
    outbound: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

/// Records each connection and lets the test play the remote side.
#[derive(Default)]
pub struct FakeConnector {
    connections: Mutex<Vec<FakeConnection>>,
}

impl FakeConnector {
    pub fn connection_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    pub fn config(&self, index: usize) -> LiveConfig {
        self.connections.lock().unwrap()[index].config.clone()
    }

    /// Deliver an event on connection `index` as if the remote sent it.
    pub fn send(&self, index: usize, event: TransportEvent) {
        let connections = self.connections.lock().unwrap();
        let _ = connections[index].events.send(event);
    }

    /// Everything the session has queued for the remote so far.
    pub fn drain_outbound(&self, index: usize) -> Vec<Outbound> {
        let mut connections = self.connections.lock().unwrap();
        let mut queued = Vec::new();
        while let Ok(outbound) = connections[index].outbound.try_recv() {
            queued.push(outbound);
        }
        queued
    }
}

impl Connector for FakeConnector {
    fn connect(&self, config: LiveConfig) -> SessionLink {
        let (link, outbound, events) = SessionLink::pair();
        self.connections.lock().unwrap().push(FakeConnection {
            config,
            outbound,
            events,
        });
        link
    }
}
