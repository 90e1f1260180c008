//! Turn-taking rendezvous between the render loop and the script thread.
//!
//! The script thread calls [`SyncGate::enter`] and blocks until the render loop
//! offers a token from [`SyncGate::think_once`]. The render loop then waits for
//! the second token, which the script sends when its [`GateGuard`] is dropped.
//! Between the two tokens only the script touches the shared state.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, select, Receiver, Sender};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("sync gate closed while waiting to enter")]
pub struct GateClosed;

struct GateInner<T> {
    state: Mutex<T>,
    token_tx: Sender<()>,
    token_rx: Receiver<()>,
    closed_rx: Receiver<()>,
    sections: AtomicU64,
}

pub struct SyncGate<T> {
    inner: Arc<GateInner<T>>,
}

impl<T> Clone for SyncGate<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

/// Dropping the closer releases any script blocked in [`SyncGate::enter`].
#[derive(Debug)]
pub struct GateCloser {
    _closed_tx: Sender<()>,
}

impl<T> SyncGate<T> {
    pub fn new(state: T) -> (Self, GateCloser) {
        let (token_tx, token_rx) = bounded(0);
        let (closed_tx, closed_rx) = bounded(0);
        let inner = GateInner { state: Mutex::new(state), token_tx, token_rx, closed_rx, sections: AtomicU64::new(0) };
        (Self { inner: Arc::new(inner) }, GateCloser { _closed_tx: closed_tx })
    }

    /// Opens a critical section from the script side.
    pub fn enter(&self) -> Result<GateGuard<'_, T>, GateClosed> {
        select! {
            recv(self.inner.token_rx) -> token => token.map_err(|_| GateClosed)?,
            recv(self.inner.closed_rx) -> _ => return Err(GateClosed),
        }
        let state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(GateGuard { gate: self, state: Some(state) })
    }

    /// Blocks the script thread, holding no critical section, until `rx`
    /// yields. `None` when the gate closes or the producer goes away first.
    pub fn await_result<R>(&self, rx: &Receiver<R>) -> Option<R> {
        select! {
            recv(rx) -> value => value.ok(),
            recv(self.inner.closed_rx) -> _ => None,
        }
    }

    /// Receiver that disconnects once the gate's closer is dropped.
    pub fn closed_signal(&self) -> Receiver<()> {
        self.inner.closed_rx.clone()
    }

    /// One non-blocking rendezvous attempt. Returns true when a script
    /// critical section ran to completion.
    pub fn try_drain(&self) -> bool {
        if self.inner.token_tx.try_send(()).is_err() {
            return false;
        }
        // The script is inside its critical section until the closing token arrives.
        let _ = self.inner.token_rx.recv();
        self.inner.sections.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Idle-drain pump, called once per rendered frame. Lets every script
    /// request that is already waiting run, then returns without blocking.
    pub fn think_once(&self) -> usize {
        let mut drained = 0;
        while self.try_drain() {
            drained += 1;
        }
        if drained > 0 {
            tracing::trace!(target: "script.gate", drained, "drained script requests");
        }
        drained
    }

    /// Render-side access to the shared state, outside any critical section.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// Total number of completed critical sections.
    pub fn sections(&self) -> u64 {
        self.inner.sections.load(Ordering::Relaxed)
    }
}

impl<T: Send + 'static> SyncGate<T> {
    /// Keeps draining on a helper thread until the handle is dropped. The
    /// caller must not touch the shared state while the handle is alive.
    pub fn sit_and_think(&self) -> ThinkHandle {
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let gate = self.clone();
        let worker = thread::spawn(move || loop {
            select! {
                send(gate.inner.token_tx, ()) -> sent => {
                    if sent.is_err() {
                        return;
                    }
                    let _ = gate.inner.token_rx.recv();
                    gate.inner.sections.fetch_add(1, Ordering::Relaxed);
                }
                recv(stop_rx) -> _ => return,
            }
        });
        ThinkHandle { stop: Some(stop_tx), worker: Some(worker) }
    }
}

pub struct GateGuard<'a, T> {
    gate: &'a SyncGate<T>,
    state: Option<MutexGuard<'a, T>>,
}

impl<T> GateGuard<'_, T> {
    /// Closes the critical section. Equivalent to dropping the guard.
    pub fn leave(self) {}
}

impl<T> Deref for GateGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.state.as_deref().unwrap_or_else(|| unreachable!("gate guard used after leave"))
    }
}

impl<T> DerefMut for GateGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.state.as_deref_mut().unwrap_or_else(|| unreachable!("gate guard used after leave"))
    }
}

impl<T> Drop for GateGuard<'_, T> {
    fn drop(&mut self) {
        // Unlock before handing the turn back so the render loop never contends.
        self.state.take();
        let _ = self.gate.inner.token_tx.send(());
    }
}

pub struct ThinkHandle {
    stop: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl Drop for ThinkHandle {
    fn drop(&mut self) {
        self.stop.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
