//! SMTP command recognition.
//!
//! Verbs are matched case-insensitively on a case-folded four-byte prefix,
//! then on the delimiters each verb requires: a space after four-letter
//! verbs that carry an argument, `:` at offset 9 for the FROM family and at
//! offset 7 for RCPT TO. Length gates are checked before any byte past the
//! reported line length is touched.

use crate::error::SmtpError;

/// Shortest line worth inspecting, CRLF included.
pub const MIN_COMMAND_LENGTH: usize = 6;

/// Shortest legal `MAIL FROM:<>` line (also SEND, SAML, SOML), CRLF included.
pub const MIN_MAIL_LINE_LENGTH: usize = 14;

/// Shortest legal `RCPT TO:<>` line, CRLF included.
pub const MIN_RCPT_LINE_LENGTH: usize = 12;

/// One parsed command line.
///
/// `MailFrom` and `RcptTo` carry the extracted address, or `None` when the
/// line had no usable `<...>` span (answered with 501 upstream).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Helo,
    Ehlo,
    MailFrom(Option<String>),
    RcptTo(Option<String>),
    Data,
    Rset,
    Noop,
    Help,
    Quit,
    /// A verb we recognize but do not serve; answered with 502.
    Unsupported(&'static str),
    /// Anything else; answered with 500.
    Unknown,
}

impl Command {
    /// Recognize one command line, CRLF included.
    #[must_use]
    pub fn parse(line: &[u8]) -> Self {
        if line.len() < MIN_COMMAND_LENGTH {
            return Self::Unknown;
        }
        let verb = [
            line[0].to_ascii_lowercase(),
            line[1].to_ascii_lowercase(),
            line[2].to_ascii_lowercase(),
            line[3].to_ascii_lowercase(),
        ];
        match &verb {
            b"helo" if line[4] == b' ' => Self::Helo,
            b"ehlo" if line[4] == b' ' => Self::Ehlo,
            b"help" => Self::Help,
            b"mail" if has_path_suffix(line, b"FROM") => {
                Self::MailFrom(extract_address(line).ok().map(to_owned_address))
            }
            b"rcpt" if has_rcpt_suffix(line) => {
                Self::RcptTo(extract_address(line).ok().map(to_owned_address))
            }
            b"data" => Self::Data,
            b"rset" => Self::Rset,
            b"noop" => Self::Noop,
            b"quit" => Self::Quit,
            b"auth" if line[4] == b' ' => Self::Unsupported("AUTH"),
            b"expn" if line[4] == b' ' => Self::Unsupported("EXPN"),
            b"vrfy" => Self::Unsupported("VRFY"),
            b"etrn" => Self::Unsupported("ETRN"),
            b"turn" => Self::Unsupported("TURN"),
            b"send" if has_path_suffix(line, b"FROM") => Self::Unsupported("SEND"),
            b"saml" if has_path_suffix(line, b"FROM") => Self::Unsupported("SAML"),
            b"soml" if has_path_suffix(line, b"FROM") => Self::Unsupported("SOML"),
            _ => Self::Unknown,
        }
    }
}

/// `<verb> FROM:` shape shared by MAIL, SEND, SAML and SOML.
fn has_path_suffix(line: &[u8], keyword: &[u8; 4]) -> bool {
    line.len() >= MIN_MAIL_LINE_LENGTH
        && line[4] == b' '
        && line[5..9].eq_ignore_ascii_case(keyword)
        && line[9] == b':'
}

fn has_rcpt_suffix(line: &[u8]) -> bool {
    line.len() >= MIN_RCPT_LINE_LENGTH
        && line[4] == b' '
        && line[5..7].eq_ignore_ascii_case(b"TO")
        && line[7] == b':'
}

fn to_owned_address(span: &[u8]) -> String {
    String::from_utf8_lossy(span).into_owned()
}

/// Extract the address span of a MAIL or RCPT line: the bytes strictly
/// between the last `<` and the last `>` on the line, requiring the `>` to
/// follow the `<`. Bytes outside the brackets, such as trailing ESMTP
/// parameters, are ignored.
///
/// # Errors
///
/// Returns [`SmtpError::AddressNotFound`] when no such span exists.
pub fn extract_address(line: &[u8]) -> Result<&[u8], SmtpError> {
    let mut start = None;
    let mut end = None;
    for (i, &b) in line.iter().enumerate() {
        if b == b'<' {
            start = Some(i);
        } else if b == b'>' {
            end = Some(i);
        }
    }
    match (start, end) {
        (Some(s), Some(e)) if e > s => Ok(&line[s + 1..e]),
        _ => Err(SmtpError::AddressNotFound),
    }
}
