//! TCP accept loop for the SMTP service.
//!
//! One listening socket, one spawned task per accepted connection. Shutdown
//! flips the shared draining flag: in-flight sessions wind down naturally
//! while latecomers are admitted only long enough to be refused with the
//! canonical 421.

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

use futures_util::future::join_all;
use postern_common::{config::Config, internal, Signal};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::broadcast,
    task::JoinHandle,
};

use crate::{error::ListenerError, message::Deliver, session::Session};

pub struct Listener {
    socket: TcpListener,
    local_addr: SocketAddr,
    config: Arc<Config>,
    sink: Arc<dyn Deliver>,
    draining: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
}

impl Listener {
    /// Bind the listening socket at the configured address.
    ///
    /// # Errors
    ///
    /// [`ListenerError::Bind`] when the socket cannot be bound; this is
    /// fatal and propagates to process exit.
    pub async fn bind(config: Arc<Config>, sink: Arc<dyn Deliver>) -> Result<Self, ListenerError> {
        let address = config.listen;
        let socket = TcpListener::bind(address)
            .await
            .map_err(|source| ListenerError::Bind {
                address: address.to_string(),
                source,
            })?;
        let local_addr = socket.local_addr().map_err(|source| ListenerError::Bind {
            address: address.to_string(),
            source,
        })?;
        Ok(Self {
            socket,
            local_addr,
            config,
            sink,
            draining: Arc::new(AtomicBool::new(false)),
            active: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// The address actually bound, which differs from the configured one
    /// when port 0 was requested.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shared gauge of currently-running sessions.
    #[must_use]
    pub fn session_gauge(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.active)
    }

    /// Accept connections until a shutdown signal arrives, then drain.
    ///
    /// Per-accept failures are logged and the loop continues. While
    /// draining, new connections still get the canonical 421 before close,
    /// and this returns once the in-flight sessions have finished.
    pub async fn serve(&self, mut shutdown: broadcast::Receiver<Signal>) {
        internal!(
            level = INFO,
            "listening for connections on {}",
            self.local_addr
        );

        let mut sessions = Vec::new();
        loop {
            tokio::select! {
                sig = shutdown.recv() => {
                    // A closed channel means the supervisor is gone; treat
                    // it like a shutdown.
                    if matches!(sig, Ok(Signal::Shutdown) | Err(_)) {
                        break;
                    }
                }
                accepted = self.socket.accept() => match accepted {
                    Ok((stream, peer)) => sessions.extend(self.admit(stream, peer)),
                    Err(err) => internal!(level = WARN, "{}", ListenerError::Accept(err)),
                }
            }
        }

        self.draining.store(true, Ordering::SeqCst);
        internal!(
            level = INFO,
            "{}: draining, {} session(s) in flight",
            self.local_addr,
            sessions.len()
        );

        let mut refusals = Vec::new();
        let winddown = join_all(sessions);
        tokio::pin!(winddown);
        loop {
            tokio::select! {
                _ = &mut winddown => break,
                accepted = self.socket.accept() => match accepted {
                    Ok((stream, peer)) => refusals.extend(self.admit(stream, peer)),
                    Err(err) => internal!(level = WARN, "{}", ListenerError::Accept(err)),
                }
            }
        }
        join_all(refusals).await;

        internal!(level = INFO, "{}: listener stopped", self.local_addr);
    }

    /// Apply client socket options and spawn the session task. A connection
    /// whose options cannot be set is dropped.
    fn admit(&self, stream: TcpStream, peer: SocketAddr) -> Option<JoinHandle<()>> {
        if let Err(err) = stream.set_linger(None) {
            internal!(level = WARN, "{peer}: set_linger: {err}");
            return None;
        }
        internal!("{peer}: client connected to {}", self.local_addr);

        let session = Session::new(
            stream,
            peer,
            Arc::clone(&self.config),
            Arc::clone(&self.sink),
            Arc::clone(&self.draining),
        );
        let active = Arc::clone(&self.active);
        Some(tokio::spawn(async move {
            active.fetch_add(1, Ordering::Relaxed);
            match session.run().await {
                Ok(()) => {}
                Err(err) if err.is_benign() => {
                    internal!(level = DEBUG, "{peer}: session ended: {err}");
                }
                Err(err) => internal!(level = WARN, "{peer}: session failed: {err}"),
            }
            internal!("{peer}: client disconnected");
            active.fetch_sub(1, Ordering::Relaxed);
        }))
    }
}
