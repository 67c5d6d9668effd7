pub mod config;
pub mod error;
pub mod logging;

pub use tracing;

/// Control signal fanned out from the supervisor to every serving component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
}
