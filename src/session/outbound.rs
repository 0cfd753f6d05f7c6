//! Bounded frame queues between the real-time pumps.
//!
//! Both directions of a call buffer through a [`FrameQueue`]: caller audio
//! waiting to go to the AI sink, and synthesized audio waiting for the 20 ms
//! playback ticker. The queue is bounded with drop-oldest overflow so a
//! stalled consumer costs freshness, never memory, and never blocks the
//! producer. `clear` supports barge-in: queued-but-unplayed output is stale
//! the moment the caller speaks.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::audio::AudioFrame;

/// Bounded FIFO of audio frames with drop-oldest overflow.
pub struct FrameQueue {
    frames: Mutex<VecDeque<AudioFrame>>,
    capacity: usize,
    dropped: AtomicU64,
    notify: Notify,
}

impl FrameQueue {
    /// Create a queue holding at most `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    /// Append a frame, evicting the oldest one when full. Never blocks.
    pub fn push(&self, frame: AudioFrame) {
        {
            let mut frames = self.frames.lock();
            if frames.len() >= self.capacity {
                frames.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            frames.push_back(frame);
        }
        self.notify.notify_one();
    }

    /// Return a frame to the head of the queue (consumer could not use it yet).
    pub fn push_front(&self, frame: AudioFrame) {
        let mut frames = self.frames.lock();
        if frames.len() >= self.capacity {
            frames.pop_back();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        frames.push_front(frame);
    }

    /// Take the oldest frame, if any. Never blocks.
    pub fn pop(&self) -> Option<AudioFrame> {
        self.frames.lock().pop_front()
    }

    /// Take the oldest frame, waiting until one is pushed.
    ///
    /// Cancellation-safe: callers race this against a shutdown token.
    pub async fn pop_wait(&self) -> AudioFrame {
        loop {
            if let Some(frame) = self.pop() {
                return frame;
            }
            self.notify.notified().await;
        }
    }

    /// Discard everything queued, returning how many frames were dropped.
    pub fn clear(&self) -> usize {
        let mut frames = self.frames.lock();
        let n = frames.len();
        frames.clear();
        n
    }

    /// Current queue depth.
    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }

    /// Total frames evicted by overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
