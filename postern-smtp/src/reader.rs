//! Line-oriented framing over a raw byte stream.
//!
//! A [`LineReader`] produces exactly one CRLF-terminated command line per
//! call, under a per-read idle deadline and a hard line-length ceiling.
//! Clients are allowed to pipeline: bytes past the returned line stay
//! buffered for the next call.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::SmtpError;

/// Maximum accepted command line length in bytes, CRLF included.
pub const MAX_LINE_LENGTH: usize = 1024;

/// Slack past the line ceiling so an overlong line can be detected without
/// the buffer being exactly full.
const SLACK: usize = 8;

/// Buffered reader that frames CRLF-terminated lines.
pub struct LineReader {
    buf: Vec<u8>,
    /// Start of the unconsumed region; the compaction pointer.
    start: usize,
    /// End of valid data.
    end: usize,
    /// Set when an overlong line is still streaming in without an LF, so
    /// [`LineReader::discard_line`] knows there are bytes left to skip.
    overflowed: bool,
    max_idle: Duration,
}

impl LineReader {
    #[must_use]
    pub fn new(max_idle: Duration) -> Self {
        Self {
            buf: vec![0; MAX_LINE_LENGTH + SLACK],
            start: 0,
            end: 0,
            overflowed: false,
            max_idle,
        }
    }

    /// Read the next complete command line, including its CRLF.
    ///
    /// Consumes exactly one line from the stream; any surplus bytes from a
    /// pipelined batch are retained for the next call.
    ///
    /// # Errors
    ///
    /// - [`SmtpError::InvalidSentinel`] if an LF arrives without a preceding
    ///   CR. The offending bytes through the LF are consumed.
    /// - [`SmtpError::LineTooLong`] if no LF appears within
    ///   [`MAX_LINE_LENGTH`] bytes. Nothing is consumed; call
    ///   [`LineReader::discard_line`] to resynchronize.
    /// - [`SmtpError::Timeout`], [`SmtpError::Closed`], [`SmtpError::Io`]
    ///   from the underlying reads.
    pub async fn next_line<'a, S>(&'a mut self, stream: &mut S) -> Result<&'a [u8], SmtpError>
    where
        S: AsyncRead + Unpin,
    {
        loop {
            if let Some(i) = find_lf(&self.buf[self.start..self.end]) {
                let line_start = self.start;
                let lf = self.start + i;
                self.start = lf + 1;
                if lf + 1 - line_start > MAX_LINE_LENGTH {
                    // The whole line was buffered, so it is already consumed
                    // and no resynchronization is needed.
                    return Err(SmtpError::LineTooLong);
                }
                if lf == line_start || self.buf[lf - 1] != b'\r' {
                    return Err(SmtpError::InvalidSentinel);
                }
                return Ok(&self.buf[line_start..=lf]);
            }
            if self.end - self.start > MAX_LINE_LENGTH {
                self.overflowed = true;
                return Err(SmtpError::LineTooLong);
            }
            self.fill(stream).await?;
        }
    }

    /// Discard the remainder of an overlong line through its terminating LF,
    /// so the session can recover. A no-op unless the previous
    /// [`LineReader::next_line`] reported an unterminated overlong line.
    ///
    /// # Errors
    ///
    /// Propagates read errors from the underlying stream.
    pub async fn discard_line<S>(&mut self, stream: &mut S) -> Result<(), SmtpError>
    where
        S: AsyncRead + Unpin,
    {
        if !self.overflowed {
            return Ok(());
        }
        loop {
            if let Some(i) = find_lf(&self.buf[self.start..self.end]) {
                self.start += i + 1;
                self.overflowed = false;
                return Ok(());
            }
            self.start = self.end;
            self.fill(stream).await?;
        }
    }

    /// Move any buffered surplus into `into`, leaving the reader empty.
    ///
    /// Body ingestion calls this first so a batch pipelined behind DATA is
    /// not lost.
    pub fn drain_buffered(&mut self, into: &mut Vec<u8>) {
        into.extend_from_slice(&self.buf[self.start..self.end]);
        self.start = 0;
        self.end = 0;
    }

    /// Read more bytes from the client under the idle deadline, appending a
    /// chunk directly to `into`. Used for body ingestion.
    ///
    /// # Errors
    ///
    /// Propagates deadline and transport errors; a zero-length read maps to
    /// [`SmtpError::Closed`].
    pub async fn slurp<S>(&self, stream: &mut S, into: &mut Vec<u8>) -> Result<usize, SmtpError>
    where
        S: AsyncRead + Unpin,
    {
        let mut chunk = [0u8; 4096];
        let n = read_with_deadline(stream, &mut chunk, self.max_idle).await?;
        into.extend_from_slice(&chunk[..n]);
        Ok(n)
    }

    async fn fill<S>(&mut self, stream: &mut S) -> Result<(), SmtpError>
    where
        S: AsyncRead + Unpin,
    {
        if self.end == self.buf.len() {
            self.buf.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        }
        let (start, end) = (self.start, self.end);
        let n = read_with_deadline(stream, &mut self.buf[end..], self.max_idle).await?;
        self.end = end + n;
        debug_assert!(start <= self.end);
        Ok(())
    }
}

async fn read_with_deadline<S>(
    stream: &mut S,
    buf: &mut [u8],
    max_idle: Duration,
) -> Result<usize, SmtpError>
where
    S: AsyncRead + Unpin,
{
    match tokio::time::timeout(max_idle, stream.read(buf)).await {
        Err(_) => Err(SmtpError::Timeout),
        Ok(Err(err)) => Err(SmtpError::Io(err)),
        Ok(Ok(0)) => Err(SmtpError::Closed),
        Ok(Ok(n)) => Ok(n),
    }
}

fn find_lf(haystack: &[u8]) -> Option<usize> {
    haystack.iter().position(|&b| b == b'\n')
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use tokio::io::AsyncWriteExt;

    use super::*;

    const IDLE: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn single_line() {
        let mut stream = Cursor::new(b"NOOP\r\n".to_vec());
        let mut reader = LineReader::new(IDLE);

        let line = reader.next_line(&mut stream).await.unwrap();
        assert_eq!(line, b"NOOP\r\n");
    }

    #[tokio::test]
    async fn pipelined_lines_come_out_one_at_a_time() {
        let mut stream = Cursor::new(b"NOOP\r\nRSET\r\nQUIT\r\n".to_vec());
        let mut reader = LineReader::new(IDLE);

        assert_eq!(reader.next_line(&mut stream).await.unwrap(), b"NOOP\r\n");
        assert_eq!(reader.next_line(&mut stream).await.unwrap(), b"RSET\r\n");
        assert_eq!(reader.next_line(&mut stream).await.unwrap(), b"QUIT\r\n");
        assert!(matches!(
            reader.next_line(&mut stream).await,
            Err(SmtpError::Closed)
        ));
    }

    #[tokio::test]
    async fn line_split_across_reads() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let mut reader = LineReader::new(IDLE);

        client.write_all(b"HELO clie").await.unwrap();
        let pending = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            client.write_all(b"nt.example\r\n").await.unwrap();
            client
        });

        let line = reader.next_line(&mut server).await.unwrap();
        assert_eq!(line, b"HELO client.example\r\n");
        drop(pending.await.unwrap());
    }

    #[tokio::test]
    async fn bare_lf_is_an_invalid_sentinel() {
        let mut stream = Cursor::new(b"NOOP\nRSET\r\n".to_vec());
        let mut reader = LineReader::new(IDLE);

        assert!(matches!(
            reader.next_line(&mut stream).await,
            Err(SmtpError::InvalidSentinel)
        ));
        // The offending bytes were consumed; the next line is intact.
        assert_eq!(reader.next_line(&mut stream).await.unwrap(), b"RSET\r\n");
    }

    #[tokio::test]
    async fn lone_lf_is_an_invalid_sentinel() {
        let mut stream = Cursor::new(b"\nNOOP\r\n".to_vec());
        let mut reader = LineReader::new(IDLE);

        assert!(matches!(
            reader.next_line(&mut stream).await,
            Err(SmtpError::InvalidSentinel)
        ));
        assert_eq!(reader.next_line(&mut stream).await.unwrap(), b"NOOP\r\n");
    }

    #[tokio::test]
    async fn overlong_line_detected_and_recovered() {
        let mut input = vec![b'x'; 1100];
        input.extend_from_slice(b"\r\nNOOP\r\n");
        let mut stream = Cursor::new(input);
        let mut reader = LineReader::new(IDLE);

        assert!(matches!(
            reader.next_line(&mut stream).await,
            Err(SmtpError::LineTooLong)
        ));
        reader.discard_line(&mut stream).await.unwrap();
        assert_eq!(reader.next_line(&mut stream).await.unwrap(), b"NOOP\r\n");
    }

    #[tokio::test]
    async fn fully_buffered_overlong_line_is_still_rejected() {
        // 1025 bytes with the CRLF already in the buffer.
        let mut input = vec![b'x'; MAX_LINE_LENGTH - 1];
        input.extend_from_slice(b"\r\nNOOP\r\n");
        let mut stream = Cursor::new(input);
        let mut reader = LineReader::new(IDLE);

        assert!(matches!(
            reader.next_line(&mut stream).await,
            Err(SmtpError::LineTooLong)
        ));
        // Recovery is a no-op here and must not eat the following command.
        reader.discard_line(&mut stream).await.unwrap();
        assert_eq!(reader.next_line(&mut stream).await.unwrap(), b"NOOP\r\n");
    }

    #[tokio::test]
    async fn maximum_length_line_is_accepted() {
        let mut input = vec![b'y'; MAX_LINE_LENGTH - 2];
        input.extend_from_slice(b"\r\n");
        let mut stream = Cursor::new(input.clone());
        let mut reader = LineReader::new(IDLE);

        let line = reader.next_line(&mut stream).await.unwrap();
        assert_eq!(line.len(), MAX_LINE_LENGTH);
        assert_eq!(line, input.as_slice());
    }

    #[tokio::test]
    async fn idle_stream_times_out() {
        let (_client, mut server) = tokio::io::duplex(64);
        let mut reader = LineReader::new(Duration::from_millis(20));

        assert!(matches!(
            reader.next_line(&mut server).await,
            Err(SmtpError::Timeout)
        ));
    }

    #[tokio::test]
    async fn drain_buffered_hands_over_pipelined_surplus() {
        let mut stream = Cursor::new(b"DATA\r\nbody bytes".to_vec());
        let mut reader = LineReader::new(IDLE);

        assert_eq!(reader.next_line(&mut stream).await.unwrap(), b"DATA\r\n");

        let mut body = Vec::new();
        reader.drain_buffered(&mut body);
        assert_eq!(body, b"body bytes");

        let mut again = Vec::new();
        reader.drain_buffered(&mut again);
        assert!(again.is_empty());
    }
}
