// src/engine/abort.rs

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use mio::Waker;

/// The "owning connection went away" flag.
///
/// Cheap to clone; every clone observes the same flag. A running multiplexer
/// attaches a waker so an abort interrupts its readiness wait instead of
/// waiting for the next timeout.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    aborted: AtomicBool,
    wakers: Mutex<Vec<Arc<Waker>>>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.inner.aborted.store(true, Ordering::SeqCst);
        if let Ok(wakers) = self.inner.wakers.lock() {
            for waker in wakers.iter() {
                // The loop checks the flag on its next iteration anyway.
                let _ = waker.wake();
            }
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::SeqCst)
    }

    pub(crate) fn attach(&self, waker: &Arc<Waker>) {
        if let Ok(mut wakers) = self.inner.wakers.lock() {
            wakers.push(Arc::clone(waker));
        }
    }

    pub(crate) fn detach(&self, waker: &Arc<Waker>) {
        if let Ok(mut wakers) = self.inner.wakers.lock() {
            wakers.retain(|w| !Arc::ptr_eq(w, waker));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let signal = AbortSignal::new();
        let clone = signal.clone();
        assert!(!clone.is_aborted());
        signal.abort();
        assert!(clone.is_aborted());
    }

    #[test]
    fn abort_wakes_an_attached_poll() {
        let mut poll = mio::Poll::new().unwrap();
        let waker = Arc::new(Waker::new(poll.registry(), mio::Token(7)).unwrap());
        let signal = AbortSignal::new();
        signal.attach(&waker);
        signal.abort();

        let mut events = mio::Events::with_capacity(4);
        poll.poll(&mut events, Some(std::time::Duration::from_secs(5)))
            .unwrap();
        assert!(events.iter().any(|e| e.token() == mio::Token(7)));

        signal.detach(&waker);
        assert!(signal.inner.wakers.lock().unwrap().is_empty());
    }
}
