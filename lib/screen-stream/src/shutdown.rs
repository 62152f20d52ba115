use std::{
    sync::{
        Arc, Condvar, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

/// Single-fire cancellation token shared by the pipeline, its workers and the
/// termination hook. Once requested it stays requested.
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    requested: AtomicBool,
    lock: Mutex<()>,
    cond: Condvar,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` only for the call that actually fired the signal.
    pub fn request(&self) -> bool {
        let _guard = self.inner.lock.lock().unwrap();
        if self.inner.requested.swap(true, Ordering::SeqCst) {
            return false;
        }

        log::info!("shutdown requested");
        self.inner.cond.notify_all();
        true
    }

    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    pub fn wait(&self) {
        let guard = self.inner.lock.lock().unwrap();
        let _guard = self
            .inner
            .cond
            .wait_while(guard, |_| !self.is_requested())
            .unwrap();
    }

    /// Returns `true` if the signal fired before `timeout` elapsed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.inner.lock.lock().unwrap();
        let (_guard, _) = self
            .inner
            .cond
            .wait_timeout_while(guard, timeout, |_| !self.is_requested())
            .unwrap();
        self.is_requested()
    }
}

impl std::fmt::Debug for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownSignal")
            .field("requested", &self.is_requested())
            .finish()
    }
}
