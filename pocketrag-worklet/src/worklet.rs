//! The host side of the channel

use crate::error::{ChannelError, Result};
use crate::runtime::{Inbound, Runtime};
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

/// Lifecycle of a worklet as seen by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkletState {
    Running,
    /// Stopped by the host
    Stopped,
    /// The program raised an error and the thread exited
    Crashed,
}

#[derive(Debug, Clone)]
pub(crate) enum Status {
    Running,
    Stopped,
    Crashed(String),
}

/// State shared between the host handle and the worklet thread.
#[derive(Debug)]
pub(crate) struct Shared {
    status: Mutex<Status>,
    pub(crate) interrupted: AtomicBool,
}

impl Shared {
    fn new() -> Self {
        Self {
            status: Mutex::new(Status::Running),
            interrupted: AtomicBool::new(false),
        }
    }

    pub(crate) fn status(&self) -> Status {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set(&self, status: Status) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }

    /// Mark stopped, unless the program already crashed.
    pub(crate) fn stop(&self) {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(*status, Status::Running) {
            *status = Status::Stopped;
        }
    }

    /// The error a send or receive should report now that the peer is gone.
    fn closed_error(&self) -> ChannelError {
        match self.status() {
            Status::Crashed(reason) => ChannelError::PeerUnavailable { reason },
            Status::Stopped => ChannelError::ChannelClosed,
            Status::Running => ChannelError::PeerUnavailable {
                reason: "worklet thread exited".to_string(),
            },
        }
    }
}

/// A running isolated program and the byte channel to it.
///
/// Both directions are unbounded FIFO queues that exist before the worklet
/// thread starts, so nothing written by either side is lost while the other
/// side is not yet listening. Messages carry no framing beyond their own
/// boundaries and arrive in send order.
pub struct Worklet {
    entry_point: String,
    to_peer: flume::Sender<Inbound>,
    from_peer: flume::Receiver<Bytes>,
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
    handler_set: AtomicBool,
}

impl std::fmt::Debug for Worklet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worklet")
            .field("entry_point", &self.entry_point)
            .field("state", &self.state())
            .field("buffered", &self.from_peer.len())
            .finish()
    }
}

impl Worklet {
    /// Start `source` in a fresh sandboxed VM on its own thread.
    ///
    /// Returns once the program's top-level code has run. A syntax error or a
    /// top-level runtime error is reported as [`ChannelError::Startup`].
    /// Dropping the returned future before it completes (for example under
    /// `tokio::time::timeout`) interrupts the program and lets the thread exit.
    pub async fn start(entry_point: impl Into<String>, source: impl Into<String>) -> Result<Self> {
        Launch::spawn(entry_point.into(), source.into())?.finish().await
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub fn state(&self) -> WorkletState {
        match self.shared.status() {
            Status::Running => WorkletState::Running,
            Status::Stopped => WorkletState::Stopped,
            Status::Crashed(_) => WorkletState::Crashed,
        }
    }

    /// Why the program crashed, if it did.
    pub fn crash_reason(&self) -> Option<String> {
        match self.shared.status() {
            Status::Crashed(reason) => Some(reason),
            _ => None,
        }
    }

    /// Queue `bytes` for the worklet. Never waits for the peer to read.
    pub fn write(&self, bytes: impl Into<Bytes>) -> Result<()> {
        match self.shared.status() {
            Status::Stopped => return Err(ChannelError::ChannelClosed),
            Status::Crashed(reason) => return Err(ChannelError::PeerUnavailable { reason }),
            Status::Running => {}
        }
        let bytes = bytes.into();
        let len = bytes.len();
        self.to_peer
            .send(Inbound::Data(bytes))
            .map_err(|_| self.shared.closed_error())?;
        tracing::trace!(entry_point = %self.entry_point, bytes = len, "wrote to worklet");
        Ok(())
    }

    /// Next message from the worklet, in send order.
    ///
    /// Buffered messages are still returned after the worklet exits; once they
    /// run out the call fails with the reason the channel closed.
    pub async fn recv(&self) -> Result<Bytes> {
        self.from_peer
            .recv_async()
            .await
            .map_err(|_| self.shared.closed_error())
    }

    /// Messages from the worklet as a stream that ends when the worklet exits.
    pub fn incoming(&self) -> flume::r#async::RecvStream<'static, Bytes> {
        self.from_peer.clone().into_stream()
    }

    /// Call `handler` once per message from the worklet, in arrival order.
    ///
    /// Messages the worklet wrote before registration are delivered first.
    /// Runs on a Tokio task, so it must be called inside a runtime. Only one
    /// handler may be registered, and `recv` should not be mixed with it.
    pub fn on_data<F>(&self, mut handler: F) -> Result<tokio::task::JoinHandle<()>>
    where
        F: FnMut(Bytes) + Send + 'static,
    {
        if self.handler_set.swap(true, Ordering::AcqRel) {
            return Err(ChannelError::HandlerAlreadySet);
        }
        let messages = self.from_peer.clone();
        let entry_point = self.entry_point.clone();
        Ok(tokio::spawn(async move {
            let mut delivered = 0u64;
            while let Ok(bytes) = messages.recv_async().await {
                handler(bytes);
                delivered += 1;
            }
            tracing::debug!(entry_point = %entry_point, delivered, "worklet data handler finished");
        }))
    }

    /// Terminate the worklet and wait for its thread to exit.
    ///
    /// A program stuck in a loop is interrupted. Later writes fail with
    /// [`ChannelError::ChannelClosed`]. Stopping twice is harmless.
    pub async fn stop(&self) -> Result<()> {
        self.shared.set(Status::Stopped);
        self.shared.interrupted.store(true, Ordering::Release);
        let _ = self.to_peer.send(Inbound::Stop);

        let thread = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(thread) = thread {
            let joined = tokio::task::spawn_blocking(move || thread.join())
                .await
                .map_err(|e| ChannelError::PeerUnavailable {
                    reason: e.to_string(),
                })?;
            if joined.is_err() {
                return Err(ChannelError::PeerUnavailable {
                    reason: "worklet thread panicked".to_string(),
                });
            }
            tracing::info!(entry_point = %self.entry_point, "worklet stopped");
        }
        Ok(())
    }
}

/// Interrupts the program unless disarmed.
///
/// Held across the wait for startup, so an abandoned `start` never leaves a
/// script spinning on a thread nobody can reach.
struct StartGuard {
    shared: Arc<Shared>,
    to_peer: flume::Sender<Inbound>,
    armed: bool,
}

impl StartGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for StartGuard {
    fn drop(&mut self) {
        if self.armed {
            self.shared.interrupted.store(true, Ordering::Release);
            let _ = self.to_peer.send(Inbound::Stop);
        }
    }
}

/// A worklet thread that has been spawned but has not reported ready.
struct Launch {
    entry_point: String,
    to_peer: flume::Sender<Inbound>,
    from_peer: flume::Receiver<Bytes>,
    shared: Arc<Shared>,
    ready: flume::Receiver<std::result::Result<(), String>>,
    thread: JoinHandle<()>,
    guard: StartGuard,
}

impl Launch {
    fn spawn(entry_point: String, source: String) -> Result<Self> {
        let (to_peer, inbound) = flume::unbounded();
        let (outbound, from_peer) = flume::unbounded();
        let (ready_tx, ready) = flume::bounded(1);
        let shared = Arc::new(Shared::new());

        let runtime = Runtime {
            entry_point: entry_point.clone(),
            source,
            inbound,
            outbound,
            shared: Arc::clone(&shared),
            ready: ready_tx,
        };
        let thread = std::thread::Builder::new()
            .name(format!("worklet:{entry_point}"))
            .spawn(move || runtime.run())
            .map_err(|e| ChannelError::Startup {
                entry_point: entry_point.clone(),
                message: e.to_string(),
            })?;

        let guard = StartGuard {
            shared: Arc::clone(&shared),
            to_peer: to_peer.clone(),
            armed: true,
        };
        Ok(Self {
            entry_point,
            to_peer,
            from_peer,
            shared,
            ready,
            thread,
            guard,
        })
    }

    /// Wait for the top-level code to finish and hand out the worklet.
    async fn finish(self) -> Result<Worklet> {
        let Launch {
            entry_point,
            to_peer,
            from_peer,
            shared,
            ready,
            thread,
            guard,
        } = self;
        let startup_error = |message: String| ChannelError::Startup {
            entry_point: entry_point.clone(),
            message,
        };

        match ready.recv_async().await {
            Ok(Ok(())) => guard.disarm(),
            Ok(Err(message)) => {
                let _ = tokio::task::spawn_blocking(move || thread.join()).await;
                tracing::warn!(entry_point = %entry_point, error = %message, "worklet failed to start");
                return Err(startup_error(message));
            }
            Err(_) => {
                return Err(startup_error(
                    "worklet thread exited during startup".to_string(),
                ));
            }
        }

        tracing::info!(entry_point = %entry_point, "worklet started");
        Ok(Worklet {
            entry_point,
            to_peer,
            from_peer,
            shared,
            thread: Mutex::new(Some(thread)),
            handler_set: AtomicBool::new(false),
        })
    }
}

impl Drop for Worklet {
    fn drop(&mut self) {
        // Detach: the thread notices and exits on its own
        self.shared.interrupted.store(true, Ordering::Release);
        let _ = self.to_peer.send(Inbound::Stop);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_dropped_launch_interrupts_endless_top_level_code() {
        let launch = Launch::spawn("/spin.lua".to_string(), "while true do end".to_string()).unwrap();
        let Launch {
            thread,
            guard,
            shared,
            ..
        } = launch;
        drop(guard);
        assert!(shared.interrupted.load(Ordering::Acquire));

        let joined = tokio::time::timeout(
            Duration::from_secs(5),
            tokio::task::spawn_blocking(move || thread.join()),
        )
        .await
        .expect("thread should exit once interrupted");
        assert!(joined.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_finished_launch_is_not_interrupted() {
        let worklet = Launch::spawn("/ok.lua".to_string(), "local x = 1".to_string())
            .unwrap()
            .finish()
            .await
            .unwrap();
        assert!(!worklet.shared.interrupted.load(Ordering::Acquire));
        assert_eq!(worklet.state(), WorkletState::Running);
        worklet.stop().await.unwrap();
    }
}
