//! The per-connection SMTP session.
//!
//! A session greets the client once, then reads, dispatches and answers one
//! command at a time until the client quits, the connection fails, or the
//! server drains. Replies are written strictly in command receipt order,
//! even when the client pipelines.

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use postern_common::{config::Config, incoming, internal, outgoing};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::{
    command::Command,
    error::SmtpError,
    message::{Deliver, Message},
    reader::LineReader,
    response,
};

/// Protocol position of a session, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Connected,
    BannerSent,
    HeloReceived,
    MailReceived,
    RcptReceived,
    DataReceived,
    BodyReceived,
}

/// Outcome of one processed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    Terminate,
}

pub struct Session<Stream: AsyncRead + AsyncWrite + Unpin + Send + Sync> {
    stream: Stream,
    reader: LineReader,
    peer: SocketAddr,
    state: SessionState,
    message: Option<Message>,
    /// Set after an overlong line has been recovered once; a second strike
    /// in a row terminates the session.
    overlong: bool,
    config: Arc<Config>,
    sink: Arc<dyn Deliver>,
    draining: Arc<AtomicBool>,
}

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send + Sync> Session<Stream> {
    pub fn new(
        stream: Stream,
        peer: SocketAddr,
        config: Arc<Config>,
        sink: Arc<dyn Deliver>,
        draining: Arc<AtomicBool>,
    ) -> Self {
        Self {
            reader: LineReader::new(config.max_idle),
            stream,
            peer,
            state: SessionState::Connected,
            message: None,
            overlong: false,
            config,
            sink,
            draining,
        }
    }

    /// Serve this session to completion.
    ///
    /// # Errors
    ///
    /// Returns the [`SmtpError`] that ended the session early; a clean QUIT
    /// returns `Ok`.
    pub async fn run(mut self) -> Result<(), SmtpError> {
        self.greet().await?;
        loop {
            if self.process().await? == Verdict::Terminate {
                return Ok(());
            }
        }
    }

    /// Send the initial banner, or the canonical 421 when the server is
    /// draining.
    ///
    /// # Errors
    ///
    /// [`SmtpError::InShutdown`] while draining, or a write failure.
    pub async fn greet(&mut self) -> Result<(), SmtpError> {
        if self.draining.load(Ordering::SeqCst) {
            self.respond_code(421).await?;
            return Err(SmtpError::InShutdown);
        }
        let banner = format!(
            "{} {} Service ready at {}",
            self.config.domain,
            self.config.ident,
            chrono::Local::now().format("%a, %d %b %Y %H:%M:%S %z"),
        );
        self.state = SessionState::BannerSent;
        self.respond(220, &banner).await
    }

    /// Read, dispatch and answer a single command.
    ///
    /// # Errors
    ///
    /// Transport failures, deadline expiry, or [`SmtpError::InShutdown`]
    /// when draining is observed at the command boundary. Framing errors
    /// are answered with 500 and recovered here, not returned.
    pub async fn process(&mut self) -> Result<Verdict, SmtpError> {
        if self.draining.load(Ordering::SeqCst) {
            self.respond_code(421).await?;
            return Err(SmtpError::InShutdown);
        }
        let command = match self.next_command().await {
            Ok(command) => command,
            Err(SmtpError::LineTooLong) => return self.recover_overlong().await,
            Err(SmtpError::InvalidSentinel) => {
                return self.continue_with(500).await;
            }
            Err(err) => return Err(err),
        };
        self.overlong = false;
        let verdict = self.dispatch(command).await?;
        tracing::debug!("{}: now in {:?}", self.peer, self.state);
        Ok(verdict)
    }

    async fn next_command(&mut self) -> Result<Command, SmtpError> {
        let line = self.reader.next_line(&mut self.stream).await?;
        incoming!("{}", String::from_utf8_lossy(line).trim_end());
        Ok(Command::parse(line))
    }

    async fn recover_overlong(&mut self) -> Result<Verdict, SmtpError> {
        self.respond_code(500).await?;
        if self.overlong {
            // Second oversized line in a row; stop humoring the client.
            return Ok(Verdict::Terminate);
        }
        self.overlong = true;
        self.reader.discard_line(&mut self.stream).await?;
        Ok(Verdict::Continue)
    }

    async fn dispatch(&mut self, command: Command) -> Result<Verdict, SmtpError> {
        match command {
            Command::Helo => self.handle_helo(false).await,
            Command::Ehlo => self.handle_helo(true).await,
            Command::MailFrom(from) => self.handle_mail(from).await,
            Command::RcptTo(rcpt) => self.handle_rcpt(rcpt).await,
            Command::Data => self.handle_data().await,
            Command::Rset => self.handle_rset().await,
            Command::Noop => self.continue_with(250).await,
            Command::Help => self.continue_with(214).await,
            Command::Quit => {
                self.respond_code(221).await?;
                Ok(Verdict::Terminate)
            }
            Command::Unsupported(verb) => {
                internal!(level = DEBUG, "{}: refusing {verb}", self.peer);
                self.continue_with(502).await
            }
            Command::Unknown => self.continue_with(500).await,
        }
    }

    async fn handle_helo(&mut self, extended: bool) -> Result<Verdict, SmtpError> {
        if self.state > SessionState::BannerSent {
            return self.continue_with(503).await;
        }
        self.message = None;
        self.state = SessionState::HeloReceived;
        let helo = self.helo_line();
        if extended {
            let size = format!("SIZE {}", self.config.max_msg_size);
            self.respond_multi(250, &[helo.as_str(), size.as_str(), "PIPELINING", "8BITMIME"])
                .await?;
        } else {
            self.respond(250, &helo).await?;
        }
        Ok(Verdict::Continue)
    }

    async fn handle_mail(&mut self, from: Option<String>) -> Result<Verdict, SmtpError> {
        if self.state != SessionState::HeloReceived {
            return self.continue_with(503).await;
        }
        let Some(from) = from else {
            internal!(
                level = DEBUG,
                "{}: {}",
                self.peer,
                SmtpError::AddressNotFound
            );
            return self.continue_with(501).await;
        };
        self.message = Some(Message::new(self.peer, from));
        self.state = SessionState::MailReceived;
        self.continue_with(250).await
    }

    async fn handle_rcpt(&mut self, rcpt: Option<String>) -> Result<Verdict, SmtpError> {
        if self.state != SessionState::MailReceived && self.state != SessionState::RcptReceived {
            return self.continue_with(503).await;
        }
        let Some(rcpt) = rcpt else {
            internal!(
                level = DEBUG,
                "{}: {}",
                self.peer,
                SmtpError::AddressNotFound
            );
            return self.continue_with(501).await;
        };
        let Some(message) = self.message.as_mut() else {
            return self.continue_with(503).await;
        };
        message.add_recipient(rcpt);
        self.state = SessionState::RcptReceived;
        self.continue_with(250).await
    }

    async fn handle_data(&mut self) -> Result<Verdict, SmtpError> {
        if self.state != SessionState::RcptReceived {
            return self.continue_with(503).await;
        }
        let Some(mut message) = self.message.take().filter(|m| !m.to.is_empty()) else {
            self.respond(554, "no valid recipients given").await?;
            return Ok(Verdict::Continue);
        };
        self.respond_code(354).await?;
        self.state = SessionState::DataReceived;
        match self.read_body().await {
            Ok(body) => {
                message.body = body;
                self.state = SessionState::BodyReceived;
                self.respond_code(250).await?;
                self.sink.deliver(message).await;
                Ok(Verdict::Continue)
            }
            Err(SmtpError::MessageTooLong) => {
                // Transaction aborted, connection preserved.
                self.state = SessionState::HeloReceived;
                self.continue_with(552).await
            }
            Err(err) => {
                internal!(
                    level = WARN,
                    "{}: failed to read body of message: {err}",
                    self.peer
                );
                Err(err)
            }
        }
    }

    async fn handle_rset(&mut self) -> Result<Verdict, SmtpError> {
        if self.state < SessionState::HeloReceived {
            return self.continue_with(503).await;
        }
        self.state = SessionState::HeloReceived;
        self.message = None;
        self.continue_with(250).await
    }

    /// Read the `<CRLF>.<CRLF>`-terminated body of a message submission.
    ///
    /// The body is returned verbatim, minus the terminating sentinel; no
    /// dot-unstuffing is performed.
    async fn read_body(&mut self) -> Result<Vec<u8>, SmtpError> {
        let mut body = Vec::new();
        self.reader.drain_buffered(&mut body);
        loop {
            if body == b".\r\n" {
                // The empty-message wire form: nothing but the terminator.
                body.clear();
                return Ok(body);
            }
            if body.ends_with(b"\r\n.\r\n") {
                body.truncate(body.len() - 5);
                return Ok(body);
            }
            if body.len() >= self.config.max_msg_size {
                return Err(SmtpError::MessageTooLong);
            }
            self.reader.slurp(&mut self.stream, &mut body).await?;
        }
    }

    fn helo_line(&self) -> String {
        format!("{} Hello [{}]", self.config.domain, self.peer.ip())
    }

    async fn continue_with(&mut self, code: u16) -> Result<Verdict, SmtpError> {
        self.respond_code(code).await?;
        Ok(Verdict::Continue)
    }

    async fn respond_code(&mut self, code: u16) -> Result<(), SmtpError> {
        self.send(response::canonical(code)).await
    }

    async fn respond(&mut self, code: u16, text: &str) -> Result<(), SmtpError> {
        let line = response::line(code, ' ', text)?;
        self.send(line.as_bytes()).await
    }

    async fn respond_multi(&mut self, code: u16, texts: &[&str]) -> Result<(), SmtpError> {
        for (idx, text) in texts.iter().enumerate() {
            let sep = if idx == texts.len() - 1 { ' ' } else { '-' };
            let line = response::line(code, sep, text)?;
            self.send(line.as_bytes()).await?;
        }
        Ok(())
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<(), SmtpError> {
        outgoing!("{}", String::from_utf8_lossy(bytes).trim_end());
        match tokio::time::timeout(self.config.max_idle, self.stream.write_all(bytes)).await {
            Err(_) => Err(SmtpError::Timeout),
            Ok(result) => result.map_err(SmtpError::Io),
        }
    }
}
