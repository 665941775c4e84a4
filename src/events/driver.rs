//! The cooperative wait loop.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::process::ExitStatus;
use std::task::Poll;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::process::Child;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::time::DelayQueue;
use tracing::{error, warn};

use crate::manifest::Label;

use super::event::DriverEvent;
use super::handle::{DriverHandle, HandleMsg};

type ChildWatcher = Pin<Box<dyn Future<Output = (Label, Option<ExitStatus>)>>>;

/// Multiplexes signals, the control socket, child exits, timers, and the
/// internal queue into a single stream of [`DriverEvent`]s.
pub struct EventDriver {
    tx: mpsc::UnboundedSender<HandleMsg>,
    rx: mpsc::UnboundedReceiver<HandleMsg>,
    signals: Vec<(i32, Signal)>,
    listener: Option<UnixListener>,
    children: FuturesUnordered<ChildWatcher>,
    timers: DelayQueue<(String, String)>,
}

impl EventDriver {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx,
            signals: Vec::new(),
            listener: None,
            children: FuturesUnordered::new(),
            timers: DelayQueue::new(),
        }
    }

    /// Returns a handle for enqueueing work from inside dispatched events.
    pub fn handle(&self) -> DriverHandle {
        DriverHandle::new(self.tx.clone())
    }

    /// Starts delivering the given signal as [`DriverEvent::Signal`].
    pub fn watch_signal(&mut self, signum: i32) -> io::Result<()> {
        let stream = signal(SignalKind::from_raw(signum))?;
        self.signals.push((signum, stream));
        Ok(())
    }

    /// Registers the control socket; incoming connections surface as
    /// [`DriverEvent::Rpc`].
    pub fn register_listener(&mut self, listener: UnixListener) {
        self.listener = Some(listener);
    }

    /// Deregisters the control socket, closing it.
    pub fn take_listener(&mut self) -> Option<UnixListener> {
        self.listener.take()
    }

    /// Whether a control socket is currently registered.
    pub fn listener_is_bound(&self) -> bool {
        self.listener.is_some()
    }

    /// Blocks until one source fires or the timeout elapses.
    ///
    /// Returns `None` on timeout. Registration messages arriving through the
    /// handle (timers to arm, children to watch) are absorbed without waking
    /// the caller; everything else is returned for dispatch.
    pub async fn wait(&mut self, timeout: Option<Duration>) -> Option<DriverEvent> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let Self {
                rx,
                signals,
                listener,
                children,
                timers,
                ..
            } = self;

            tokio::select! {
                biased;
                Some(msg) = rx.recv() => match msg {
                    HandleMsg::Call { method, arg } => {
                        return Some(DriverEvent::Ipc { method, arg });
                    }
                    HandleMsg::Timer { delay, method, arg } => {
                        timers.insert((method, arg), delay);
                    }
                    HandleMsg::WatchChild { label, child } => {
                        children.push(Box::pin(reap(label, child)));
                    }
                },
                signum = next_signal(signals) => {
                    return Some(DriverEvent::Signal(signum));
                }
                Some((label, status)) = children.next() => {
                    return Some(DriverEvent::ChildExited { label, status });
                }
                Some((method, arg)) = next_expired(timers) => {
                    return Some(DriverEvent::Ipc { method, arg });
                }
                conn = accept_on(listener) => match conn {
                    Ok(stream) => return Some(DriverEvent::Rpc(stream)),
                    Err(e) => warn!(error = %e, "failed to accept rpc connection"),
                },
                _ = idle_until(deadline) => return None,
            }
        }
    }
}

impl Default for EventDriver {
    fn default() -> Self {
        Self::new()
    }
}

async fn reap(label: Label, mut child: Child) -> (Label, Option<ExitStatus>) {
    match child.wait().await {
        Ok(status) => (label, Some(status)),
        Err(e) => {
            error!(job = %label, error = %e, "failed to reap child process");
            (label, None)
        }
    }
}

fn next_signal<'a>(signals: &'a mut [(i32, Signal)]) -> impl Future<Output = i32> + 'a {
    futures::future::poll_fn(move |cx| {
        for (signum, stream) in signals.iter_mut() {
            if stream.poll_recv(cx).is_ready() {
                return Poll::Ready(*signum);
            }
        }
        Poll::Pending
    })
}

fn next_expired<'a>(
    timers: &'a mut DelayQueue<(String, String)>,
) -> impl Future<Output = Option<(String, String)>> + 'a {
    futures::future::poll_fn(move |cx| {
        timers
            .poll_expired(cx)
            .map(|expired| expired.map(|e| e.into_inner()))
    })
}

async fn accept_on(listener: &Option<UnixListener>) -> io::Result<UnixStream> {
    match listener {
        Some(l) => l.accept().await.map(|(stream, _addr)| stream),
        None => std::future::pending().await,
    }
}

async fn idle_until(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "current_thread")]
    async fn wait_returns_none_on_timeout() {
        let mut driver = EventDriver::new();
        let ev = driver.wait(Some(Duration::from_millis(10))).await;
        assert!(ev.is_none());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn queued_call_is_delivered() {
        let mut driver = EventDriver::new();
        driver.handle().call("ping", "x");
        match driver.wait(Some(Duration::from_millis(100))).await {
            Some(DriverEvent::Ipc { method, arg }) => {
                assert_eq!(method, "ping");
                assert_eq!(arg, "x");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn armed_timer_fires_as_ipc() {
        let mut driver = EventDriver::new();
        driver
            .handle()
            .arm_timer(Duration::from_millis(20), "tick", "t");
        // First pass absorbs the registration, then the timer expires.
        match driver.wait(Some(Duration::from_secs(2))).await {
            Some(DriverEvent::Ipc { method, .. }) => assert_eq!(method, "tick"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn child_exit_is_observed() {
        let mut driver = EventDriver::new();
        let child = tokio::process::Command::new("true")
            .spawn()
            .expect("spawn true");
        driver.handle().watch_child(Label::from("t"), child);
        match driver.wait(Some(Duration::from_secs(5))).await {
            Some(DriverEvent::ChildExited { label, status }) => {
                assert_eq!(label.as_str(), "t");
                assert!(status.expect("reaped").success());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
