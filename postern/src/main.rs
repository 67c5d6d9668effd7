use std::{
    path::PathBuf,
    sync::{atomic::Ordering, Arc},
};

use async_trait::async_trait;
use postern_common::{config::Config, internal, logging, Signal};
use postern_smtp::{Deliver, Listener, Message};
use tokio::sync::broadcast;

#[cfg(not(unix))]
compile_error!("only unix-like targets are currently supported");

/// Placeholder downstream handler: accepted submissions are logged and
/// dropped. A real deployment swaps this for something that forwards the
/// record elsewhere.
struct LogSink;

#[async_trait]
impl Deliver for LogSink {
    async fn deliver(&self, message: Message) {
        internal!(
            level = INFO,
            "accepted message from {} (sender {}, {} recipient(s), {} byte body)",
            message.remote,
            message.from,
            message.to.len(),
            message.body.len()
        );
    }
}

fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    logging::init(config.log_level);
    internal!(level = INFO, "loaded config: {config}");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.cores)
        .enable_all()
        .build()?;
    runtime.block_on(serve(Arc::new(config)))
}

async fn serve(config: Arc<Config>) -> anyhow::Result<()> {
    let (shutdown, _) = broadcast::channel(16);
    tokio::spawn(trap_signals(shutdown.clone()));

    let listener = Listener::bind(Arc::clone(&config), Arc::new(LogSink)).await?;
    tokio::spawn(report_stats(config.stats_refresh, listener.session_gauge()));

    listener.serve(shutdown.subscribe()).await;

    internal!(level = INFO, "shut down");
    Ok(())
}

/// Broadcast a shutdown once SIGINT or SIGTERM arrives.
async fn trap_signals(shutdown: broadcast::Sender<Signal>) {
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                internal!(level = ERROR, "failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!(level = INFO, "interrupt received, shutting down");
        }
        () = terminate => {
            internal!(level = INFO, "terminate signal received, shutting down");
        }
    }

    let _ = shutdown.send(Signal::Shutdown);
}

/// Periodic one-line health report.
async fn report_stats(
    every: std::time::Duration,
    sessions: Arc<std::sync::atomic::AtomicUsize>,
) {
    let mut tick = tokio::time::interval(every);
    tick.tick().await;
    loop {
        tick.tick().await;
        internal!(
            level = DEBUG,
            "{} active session(s)",
            sessions.load(Ordering::Relaxed)
        );
    }
}
