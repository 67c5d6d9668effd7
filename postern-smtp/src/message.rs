//! The accepted-submission record and the seam it is handed through.

use std::net::SocketAddr;

use async_trait::async_trait;
use serde::Serialize;

/// A single accepted SMTP message submission.
///
/// Assembled over the course of one MAIL/RCPT/DATA transaction and moved
/// out to the configured [`Deliver`] implementation immediately after the
/// body is acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    /// Peer address captured when the transaction began.
    pub remote: SocketAddr,
    /// Envelope sender.
    pub from: String,
    /// Envelope recipients, in the order they were accepted. Duplicates are
    /// kept.
    pub to: Vec<String>,
    /// Message body with the terminating sentinel removed.
    pub body: Vec<u8>,
}

impl Message {
    #[must_use]
    pub fn new(remote: SocketAddr, from: String) -> Self {
        Self {
            remote,
            from,
            to: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Append a recipient to this submission.
    pub fn add_recipient(&mut self, rcpt: String) {
        self.to.push(rcpt);
    }
}

/// Downstream handler for accepted submissions.
///
/// The server takes an `Arc<dyn Deliver>` and invokes it once per accepted
/// message, after the closing 250 has been written. What happens to the
/// message from there is the implementation's business.
#[async_trait]
pub trait Deliver: Send + Sync {
    async fn deliver(&self, message: Message);
}
