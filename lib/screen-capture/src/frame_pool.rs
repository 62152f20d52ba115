use crate::{FrameSink, RawFrame};
use crossbeam::channel::{Receiver, Sender, bounded};
use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

#[derive(Debug, Default)]
struct PoolState {
    pending: VecDeque<RawFrame>,
    in_flight: usize,
    closed: bool,
}

/// Bounded pool of rendered frames where the consumer only ever gets the latest one.
///
/// A frame occupies a slot from the moment it is rendered until the consumer's
/// [`FrameGuard`] is dropped. When every slot is taken the oldest pending frame
/// is recycled, and if the consumer holds all slots the new frame is dropped.
pub struct FramePool {
    capacity: usize,
    state: Mutex<PoolState>,
    available_sender: Sender<()>,
    available_receiver: Receiver<()>,
    dropped: AtomicU64,
}

impl FramePool {
    pub fn new(capacity: usize) -> Arc<Self> {
        assert!(capacity > 0);

        let (available_sender, available_receiver) = bounded(1);
        Arc::new(Self {
            capacity,
            state: Mutex::new(PoolState::default()),
            available_sender,
            available_receiver,
            dropped: AtomicU64::new(0),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Fires at least once after each rendered frame.
    pub fn frame_available(&self) -> Receiver<()> {
        self.available_receiver.clone()
    }

    /// Take the newest pending frame, recycling the older ones.
    pub fn acquire_latest(self: &Arc<Self>) -> Option<FrameGuard> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return None;
        }

        let frame = state.pending.pop_back()?;
        let stale = state.pending.len() as u64;
        state.pending.clear();
        state.in_flight += 1;

        if stale > 0 {
            self.dropped.fetch_add(stale, Ordering::Relaxed);
            log::debug!("frame pool skipped {stale} stale frame(s)");
        }

        Some(FrameGuard {
            pool: self.clone(),
            frame: Some(frame),
        })
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().unwrap().in_flight
    }

    pub fn pending(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn release_slot(&self) {
        let mut state = self.state.lock().unwrap();
        state.in_flight = state.in_flight.saturating_sub(1);
    }
}

impl FrameSink for FramePool {
    fn push_frame(&self, frame: RawFrame) {
        {
            let mut state = self.state.lock().unwrap();
            if state.closed {
                return;
            }

            if state.pending.len() + state.in_flight >= self.capacity {
                if state.pending.pop_front().is_none() {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    log::debug!("frame pool exhausted, drop rendered frame");
                    return;
                }
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }

            state.pending.push_back(frame);
        }

        _ = self.available_sender.try_send(());
    }

    fn close(&self) {
        let mut state = self.state.lock().unwrap();
        if !state.closed {
            state.closed = true;
            state.pending.clear();
            log::info!("frame pool closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

/// Scoped ownership of one pooled frame. The slot goes back to the pool on drop.
pub struct FrameGuard {
    pool: Arc<FramePool>,
    frame: Option<RawFrame>,
}

impl FrameGuard {
    pub fn frame(&self) -> &RawFrame {
        // Only `drop` takes the frame out.
        self.frame.as_ref().unwrap()
    }
}

impl std::ops::Deref for FrameGuard {
    type Target = RawFrame;

    fn deref(&self) -> &Self::Target {
        self.frame()
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        self.frame.take();
        self.pool.release_slot();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn frame(index: u64) -> RawFrame {
        RawFrame::new(1, 1, 4, vec![index as u8; 4]).with_timestamp(Duration::from_millis(index))
    }

    #[test]
    fn test_acquire_latest_drops_older() {
        let pool = FramePool::new(3);
        pool.push_frame(frame(1));
        pool.push_frame(frame(2));
        pool.push_frame(frame(3));

        let guard = pool.acquire_latest().unwrap();
        assert_eq!(guard.timestamp, Duration::from_millis(3));
        assert_eq!(pool.pending(), 0);
        assert_eq!(pool.dropped_frames(), 2);
        assert_eq!(pool.in_flight(), 1);

        drop(guard);
        assert_eq!(pool.in_flight(), 0);
        assert!(pool.acquire_latest().is_none());
    }

    #[test]
    fn test_full_pool_recycles_oldest() {
        let pool = FramePool::new(2);
        pool.push_frame(frame(1));
        pool.push_frame(frame(2));
        pool.push_frame(frame(3));

        assert_eq!(pool.pending(), 2);
        assert_eq!(pool.dropped_frames(), 1);
        assert_eq!(pool.acquire_latest().unwrap().timestamp, Duration::from_millis(3));
    }

    #[test]
    fn test_consumer_holding_all_slots() {
        let pool = FramePool::new(1);
        pool.push_frame(frame(1));
        let guard = pool.acquire_latest().unwrap();

        pool.push_frame(frame(2));
        assert_eq!(pool.pending(), 0);
        assert_eq!(pool.dropped_frames(), 1);

        drop(guard);
        pool.push_frame(frame(3));
        assert_eq!(pool.acquire_latest().unwrap().timestamp, Duration::from_millis(3));
    }

    #[test]
    fn test_notification_and_close() {
        let pool = FramePool::new(2);
        let available = pool.frame_available();
        pool.push_frame(frame(1));
        assert!(available.try_recv().is_ok());

        pool.close();
        pool.close();
        assert!(pool.is_closed());
        assert!(pool.acquire_latest().is_none());

        pool.push_frame(frame(2));
        assert_eq!(pool.pending(), 0);
    }
}
