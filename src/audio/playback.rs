//! # Playback Scheduler
//!
//! Lays decoded model audio end-to-end on an output clock so consecutive
//! chunks play gap-free and never overlap, and silences everything at once
//! when the user barges in.
//!
//! ## Scheduling Rule:
//! ```text
//! start_at = max(cursor, now)
//! cursor   = start_at + duration
//! ```
//! On interruption every active source is stopped and the cursor snaps to
//! `now`. It never resets to zero, because the output clock keeps running.

use crate::audio::codec::PlayableBuffer;
use crate::audio::device::DeviceAccessError;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Identifier of one scheduled buffer on an output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u64);

/// An opened output clock.
///
/// Implementations report natural completion of a source on the `ended`
/// channel they were opened with.
pub trait AudioOutput: Send {
    /// Current position of the output clock, in seconds.
    fn now(&self) -> f64;

    /// Start `buffer` at the absolute clock time `start_at`.
    fn schedule(&mut self, id: SourceId, buffer: PlayableBuffer, start_at: f64);

    /// Stop a source early. Stopped sources do not report completion.
    fn stop(&mut self, id: SourceId);

    /// Release the underlying device.
    fn close(&mut self);
}

/// Factory for output clocks.
pub trait OutputDevice: Send + Sync {
    fn open(
        &self,
        sample_rate: u32,
        ended: mpsc::UnboundedSender<SourceId>,
    ) -> Result<Box<dyn AudioOutput>, DeviceAccessError>;
}

/// Where and for how long a buffer was placed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scheduled {
    pub id: SourceId,
    pub start_at: f64,
    pub duration: f64,
}

/// Owner of the playback cursor and the set of active sources.
pub struct PlaybackScheduler {
    output: Option<Box<dyn AudioOutput>>,
    cursor: f64,
    active: HashMap<SourceId, Scheduled>,
    next_id: u64,
}

impl PlaybackScheduler {
    pub fn new(output: Box<dyn AudioOutput>) -> Self {
        Self {
            output: Some(output),
            cursor: 0.0,
            active: HashMap::new(),
            next_id: 0,
        }
    }

    /// Schedule a buffer right after everything already queued.
    ///
    /// Returns `None` once the scheduler has been torn down.
    pub fn enqueue(&mut self, buffer: PlayableBuffer) -> Option<Scheduled> {
        let output = self.output.as_mut()?;

        let start_at = self.cursor.max(output.now());
        let duration = buffer.duration();
        let id = SourceId(self.next_id);
        self.next_id += 1;

        output.schedule(id, buffer, start_at);
        self.cursor = start_at + duration;

        let scheduled = Scheduled {
            id,
            start_at,
            duration,
        };
        self.active.insert(id, scheduled);
        trace!(
            "Scheduled source {} at {:.3}s for {:.3}s",
            id.0,
            start_at,
            duration
        );
        Some(scheduled)
    }

    /// Stop every active source and move the cursor to the present.
    ///
    /// Returns how many sources were cut off.
    pub fn interrupt(&mut self) -> usize {
        let Some(output) = self.output.as_mut() else {
            return 0;
        };

        let stopped = self.active.len();
        for id in self.active.keys() {
            output.stop(*id);
        }
        self.active.clear();
        self.cursor = output.now();

        debug!("Playback interrupted, {} sources stopped", stopped);
        stopped
    }

    /// Record the natural end of a source.
    pub fn source_ended(&mut self, id: SourceId) {
        if self.active.remove(&id).is_some() {
            trace!("Source {} finished", id.0);
        }
    }

    /// Stop all sources and release the output. Idempotent.
    pub fn teardown(&mut self) {
        if let Some(mut output) = self.output.take() {
            for id in self.active.keys() {
                output.stop(*id);
            }
            self.active.clear();
            output.close();
            debug!("Playback output released");
        }
    }

    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn is_open(&self) -> bool {
        self.output.is_some()
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::FakeOutputDevice;

    fn chunk(seconds: f64) -> PlayableBuffer {
        PlayableBuffer::mono(24_000, vec![0.0; (seconds * 24_000.0) as usize])
    }

    fn scheduler(device: &FakeOutputDevice) -> (PlaybackScheduler, mpsc::UnboundedReceiver<SourceId>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let output = device.open(24_000, tx).unwrap();
        (PlaybackScheduler::new(output), rx)
    }

    #[test]
    fn test_sequential_chunks_play_back_to_back() {
        let device = FakeOutputDevice::new();
        device.set_now(10.0);
        let (mut scheduler, _ended) = scheduler(&device);

        let lengths = [0.5, 0.25, 1.0, 0.125, 0.75];
        let placed: Vec<Scheduled> = lengths
            .iter()
            .map(|&len| scheduler.enqueue(chunk(len)).unwrap())
            .collect();

        assert_eq!(placed[0].start_at, 10.0);
        for pair in placed.windows(2) {
            assert!(pair[1].start_at >= pair[0].start_at);
            let gap = pair[1].start_at - (pair[0].start_at + pair[0].duration);
            assert!(gap.abs() < 1e-9, "gap {}", gap);
        }
        assert_eq!(scheduler.active_count(), lengths.len());
        assert_eq!(device.scheduled().len(), lengths.len());
    }

    #[test]
    fn test_late_chunk_starts_now_instead_of_in_the_past() {
        let device = FakeOutputDevice::new();
        let (mut scheduler, _ended) = scheduler(&device);

        scheduler.enqueue(chunk(0.5)).unwrap();
        device.set_now(3.0);
        let late = scheduler.enqueue(chunk(0.5)).unwrap();

        assert_eq!(late.start_at, 3.0);
        assert_eq!(scheduler.cursor(), 3.5);
    }

    #[test]
    fn test_interrupt_stops_everything_and_resets_cursor_to_now() {
        let device = FakeOutputDevice::new();
        device.set_now(1.0);
        let (mut scheduler, _ended) = scheduler(&device);

        let ids: Vec<SourceId> = (0..3).map(|_| scheduler.enqueue(chunk(1.0)).unwrap().id).collect();
        device.set_now(1.4);

        assert_eq!(scheduler.interrupt(), 3);
        assert_eq!(scheduler.active_count(), 0);
        assert_eq!(scheduler.cursor(), 1.4);

        let mut stopped = device.stopped();
        stopped.sort();
        assert_eq!(stopped, ids);

        let next = scheduler.enqueue(chunk(0.5)).unwrap();
        assert!(next.start_at >= 1.4);
    }

    #[test]
    fn test_natural_completion_removes_source() {
        let device = FakeOutputDevice::new();
        let (mut scheduler, mut ended) = scheduler(&device);

        scheduler.enqueue(chunk(0.5)).unwrap();
        scheduler.enqueue(chunk(0.5)).unwrap();

        device.advance(0.6);
        let finished = ended.try_recv().unwrap();
        scheduler.source_ended(finished);

        assert_eq!(finished, SourceId(0));
        assert_eq!(scheduler.active_count(), 1);
        assert!(ended.try_recv().is_err());
    }

    #[test]
    fn test_teardown_is_idempotent_and_rejects_new_audio() {
        let device = FakeOutputDevice::new();
        let (mut scheduler, _ended) = scheduler(&device);
        scheduler.enqueue(chunk(1.0)).unwrap();

        scheduler.teardown();
        scheduler.teardown();

        assert!(!scheduler.is_open());
        assert_eq!(scheduler.active_count(), 0);
        assert_eq!(device.closed_count(), 1);
        assert_eq!(device.stopped(), vec![SourceId(0)]);
        assert!(scheduler.enqueue(chunk(1.0)).is_none());
        assert_eq!(scheduler.interrupt(), 0);
    }
}
