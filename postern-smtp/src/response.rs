//! Canonical SMTP reply lines.
//!
//! Fixed replies are compile-time data keyed by numeric code; each entry is
//! the complete wire form including the trailing CRLF. Dynamic replies
//! (banner, HELO line, EHLO capability list) are formatted ad hoc by the
//! session through [`line`]-style helpers.

use core::fmt::Write;

use arrayvec::ArrayString;
use phf::phf_map;

use crate::error::SmtpError;

/// Upper bound on any single formatted reply line, CRLF included.
pub const MAX_REPLY_LENGTH: usize = 512;

static REPLIES: phf::Map<u16, &'static str> = phf_map! {
    211u16 => "211 System status, or system help reply\r\n",
    214u16 => "214 http://www.ietf.org/rfc/rfc2821.txt\r\n",
    220u16 => "220 Service ready\r\n",
    221u16 => "221 Service closing transmission channel\r\n",
    250u16 => "250 OK\r\n",
    251u16 => "251 User not local; will attempt to forward\r\n",
    252u16 => "252 Cannot VRFY user, but will accept message and attempt delivery\r\n",
    354u16 => "354 Start mail input; end with <CRLF>.<CRLF>\r\n",
    421u16 => "421 Service not available, closing transmission channel\r\n",
    450u16 => "450 Requested mail action not taken: mailbox unavailable\r\n",
    451u16 => "451 Requested action aborted: local error in processing\r\n",
    452u16 => "452 Requested action not taken: insufficient system storage\r\n",
    500u16 => "500 Syntax error, command unrecognized\r\n",
    501u16 => "501 Syntax error in parameters or arguments\r\n",
    502u16 => "502 Command not implemented\r\n",
    503u16 => "503 Bad sequence of commands\r\n",
    504u16 => "504 Command parameter not implemented\r\n",
    550u16 => "550 Requested action not taken: mailbox unavailable\r\n",
    551u16 => "551 User not local\r\n",
    552u16 => "552 Requested mail action aborted: exceeded storage allocation\r\n",
    553u16 => "553 Requested action not taken: mailbox name not allowed\r\n",
    554u16 => "554 Transaction failed\r\n",
};

/// Look up the canonical reply line for `code`.
///
/// Every code the engine emits has an entry; an unknown code falls back to
/// the local-error reply rather than panicking mid-session.
#[must_use]
pub fn canonical(code: u16) -> &'static [u8] {
    debug_assert!(REPLIES.contains_key(&code), "no canonical reply for {code}");
    REPLIES
        .get(&code)
        .copied()
        .unwrap_or("451 Requested action aborted: local error in processing\r\n")
        .as_bytes()
}

/// Format a single dynamic reply line as `CCC<sep><text>CRLF`.
///
/// `sep` is `-` for all but the last line of a multi-line reply and a space
/// otherwise.
///
/// # Errors
///
/// Returns [`SmtpError::Format`] if the line would exceed
/// [`MAX_REPLY_LENGTH`].
pub fn line(code: u16, sep: char, text: &str) -> Result<ArrayString<MAX_REPLY_LENGTH>, SmtpError> {
    let mut buffer = ArrayString::new();
    write!(&mut buffer, "{code}{sep}{text}\r\n")?;
    Ok(buffer)
}
