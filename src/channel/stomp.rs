//! STOMP 1.2 frame codec.
//!
//! A frame is a command line, `name:value` header lines, a blank line, the
//! body, and a NUL octet:
//!
//! ```text
//! SUBSCRIBE\n
//! id:sub-0\n
//! destination:/user/queue/notifications\n
//! \n
//! \0
//! ```
//!
//! Header values are escaped (`\\`, `\n`, `\r`, `\c`) in every frame except
//! `CONNECT` and `CONNECTED`. When `content-length` is present the body is
//! exactly that many octets; otherwise it runs to the first NUL. Bare EOLs
//! between frames are heart-beats and are skipped.

use std::fmt::Write as _;

/// STOMP commands understood by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Client handshake.
    Connect,
    /// Client handshake (1.2 alias of `CONNECT`).
    Stomp,
    /// Server handshake reply.
    Connected,
    /// Client publish.
    Send,
    /// Client subscription.
    Subscribe,
    /// Client unsubscription.
    Unsubscribe,
    /// Client acknowledgment.
    Ack,
    /// Client negative acknowledgment.
    Nack,
    /// Transaction start.
    Begin,
    /// Transaction commit.
    Commit,
    /// Transaction abort.
    Abort,
    /// Client goodbye.
    Disconnect,
    /// Server delivery.
    Message,
    /// Server receipt.
    Receipt,
    /// Server error; the connection closes after it.
    Error,
}

impl Command {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Stomp => "STOMP",
            Self::Connected => "CONNECTED",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Ack => "ACK",
            Self::Nack => "NACK",
            Self::Begin => "BEGIN",
            Self::Commit => "COMMIT",
            Self::Abort => "ABORT",
            Self::Disconnect => "DISCONNECT",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    /// Parse a wire name. Commands are case-sensitive.
    pub fn parse(value: &str) -> Option<Self> {
        let command = match value {
            "CONNECT" => Self::Connect,
            "STOMP" => Self::Stomp,
            "CONNECTED" => Self::Connected,
            "SEND" => Self::Send,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "ACK" => Self::Ack,
            "NACK" => Self::Nack,
            "BEGIN" => Self::Begin,
            "COMMIT" => Self::Commit,
            "ABORT" => Self::Abort,
            "DISCONNECT" => Self::Disconnect,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            _ => return None,
        };
        Some(command)
    }

    /// Header values of `CONNECT` and `CONNECTED` are not escaped.
    fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from decoding a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Input ended before the frame's NUL terminator.
    Incomplete,
    /// Command line is not a STOMP command.
    UnknownCommand(String),
    /// Header line without a colon.
    InvalidHeader(String),
    /// Undefined escape sequence in a header.
    InvalidEscape(String),
    /// `content-length` is not a number, or the body does not end where it says.
    InvalidContentLength(String),
    /// Frame text is not UTF-8.
    InvalidUtf8,
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Incomplete => write!(f, "Incomplete frame"),
            Self::UnknownCommand(cmd) => write!(f, "Unknown command: {cmd}"),
            Self::InvalidHeader(line) => write!(f, "Invalid header line: {line}"),
            Self::InvalidEscape(value) => write!(f, "Invalid header escape in: {value}"),
            Self::InvalidContentLength(value) => write!(f, "Invalid content-length: {value}"),
            Self::InvalidUtf8 => write!(f, "Frame is not valid UTF-8"),
        }
    }
}

impl std::error::Error for FrameError {}

/// One STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame command.
    pub command: Command,
    /// Headers in wire order. Repeated names are kept; the first one wins.
    pub headers: Vec<(String, String)>,
    /// Frame body.
    pub body: String,
}

impl Frame {
    /// Frame with no headers and an empty body.
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Append a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the body.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Value of the first header called `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Client `CONNECT` for `host`. Heart-beating is disabled.
    pub fn connect(host: &str) -> Self {
        Self::new(Command::Connect)
            .header("accept-version", "1.2,1.1,1.0")
            .header("host", host)
            .header("heart-beat", "0,0")
    }

    /// `SUBSCRIBE` to `destination` under subscription `id`.
    pub fn subscribe(id: &str, destination: &str) -> Self {
        Self::new(Command::Subscribe)
            .header("id", id)
            .header("destination", destination)
    }

    /// `UNSUBSCRIBE` subscription `id`.
    pub fn unsubscribe(id: &str) -> Self {
        Self::new(Command::Unsubscribe).header("id", id)
    }

    /// `DISCONNECT`.
    pub fn disconnect() -> Self {
        Self::new(Command::Disconnect)
    }

    /// Best human-readable text of an `ERROR` frame.
    pub fn error_detail(&self) -> String {
        match self.get("message") {
            Some(message) if !message.is_empty() => message.to_string(),
            _ if !self.body.is_empty() => self.body.trim_end().to_string(),
            _ => "server sent ERROR".to_string(),
        }
    }

    /// Encode to wire text, NUL-terminated.
    ///
    /// A `content-length` header is added when the body is not empty and the
    /// frame does not already carry one.
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                let _ = writeln!(out, "{}:{}", escape_header(name), escape_header(value));
            } else {
                let _ = writeln!(out, "{name}:{value}");
            }
        }
        if !self.body.is_empty() && self.get("content-length").is_none() {
            let _ = writeln!(out, "content-length:{}", self.body.len());
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }
}

/// Decode every frame in `input`, skipping heart-beat EOLs.
pub fn decode_all(input: &str) -> Result<Vec<Frame>, FrameError> {
    let bytes = input.as_bytes();
    let mut frames = Vec::new();
    let mut pos = 0;

    loop {
        while pos < bytes.len() && (bytes[pos] == b'\n' || bytes[pos] == b'\r') {
            pos += 1;
        }
        if pos >= bytes.len() {
            return Ok(frames);
        }
        let (frame, used) = decode_one(&bytes[pos..])?;
        frames.push(frame);
        pos += used;
    }
}

/// Decode one frame from the start of `buf`, returning it and the number of
/// octets consumed (including the NUL).
fn decode_one(buf: &[u8]) -> Result<(Frame, usize), FrameError> {
    let mut pos = 0;

    let command_line = read_line(buf, &mut pos)?;
    let command = Command::parse(command_line)
        .ok_or_else(|| FrameError::UnknownCommand(command_line.to_string()))?;

    let mut headers = Vec::new();
    loop {
        let line = read_line(buf, &mut pos)?;
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| FrameError::InvalidHeader(line.to_string()))?;
        if command.escapes_headers() {
            headers.push((unescape_header(name)?, unescape_header(value)?));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    let content_length = headers
        .iter()
        .find(|(n, _)| n == "content-length")
        .map(|(_, v)| {
            v.trim()
                .parse::<usize>()
                .map_err(|_| FrameError::InvalidContentLength(v.clone()))
        })
        .transpose()?;

    let rest = &buf[pos..];
    let body_len = match content_length {
        Some(len) => {
            if rest.len() <= len {
                return Err(FrameError::Incomplete);
            }
            if rest[len] != 0 {
                return Err(FrameError::InvalidContentLength(len.to_string()));
            }
            len
        }
        None => rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(FrameError::Incomplete)?,
    };

    let body = std::str::from_utf8(&rest[..body_len])
        .map_err(|_| FrameError::InvalidUtf8)?
        .to_string();

    Ok((
        Frame {
            command,
            headers,
            body,
        },
        pos + body_len + 1,
    ))
}

/// Read up to the next LF, dropping an optional trailing CR.
fn read_line<'a>(buf: &'a [u8], pos: &mut usize) -> Result<&'a str, FrameError> {
    let start = *pos;
    let end = buf[start..]
        .iter()
        .position(|&b| b == b'\n')
        .map(|i| start + i)
        .ok_or(FrameError::Incomplete)?;
    *pos = end + 1;

    let line = &buf[start..end];
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    std::str::from_utf8(line).map_err(|_| FrameError::InvalidUtf8)
}

fn escape_header(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(value: &str) -> Result<String, FrameError> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            _ => return Err(FrameError::InvalidEscape(value.to_string())),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_connect() {
        let text = Frame::connect("localhost").encode();
        assert_eq!(
            text,
            "CONNECT\naccept-version:1.2,1.1,1.0\nhost:localhost\nheart-beat:0,0\n\n\0"
        );
    }

    #[test]
    fn test_encode_subscribe_escapes_headers() {
        let text = Frame::subscribe("sub-0", "/queue/a:b").encode();
        assert_eq!(text, "SUBSCRIBE\nid:sub-0\ndestination:/queue/a\\cb\n\n\0");
    }

    #[test]
    fn test_encode_adds_content_length() {
        let text = Frame::new(Command::Send)
            .header("destination", "/app/x")
            .body("héllo")
            .encode();
        assert!(text.contains("content-length:6\n"));
        assert!(text.ends_with("\n\nhéllo\0"));
    }

    #[test]
    fn test_decode_message_frame() {
        let wire = "MESSAGE\ndestination:/user/queue/notifications\nsubscription:sub-0\nmessage-id:1\ncontent-type:application/json\n\n{\"id\":1,\"message\":\"A\"}\0";
        let frames = decode_all(wire).unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command, Command::Message);
        assert_eq!(frames[0].get("subscription"), Some("sub-0"));
        assert_eq!(frames[0].body, r#"{"id":1,"message":"A"}"#);
    }

    #[test]
    fn test_decode_connected_keeps_raw_headers() {
        let frames = decode_all("CONNECTED\nversion:1.2\nserver:x\\y\n\n\0").unwrap();
        assert_eq!(frames[0].command, Command::Connected);
        assert_eq!(frames[0].get("server"), Some("x\\y"));
    }

    #[test]
    fn test_decode_unescapes_headers() {
        let frames = decode_all("MESSAGE\nk:a\\cb\\nc\\\\\n\n\0").unwrap();
        assert_eq!(frames[0].get("k"), Some("a:b\nc\\"));
    }

    #[test]
    fn test_decode_rejects_bad_escape() {
        assert!(matches!(
            decode_all("MESSAGE\nk:a\\tb\n\n\0"),
            Err(FrameError::InvalidEscape(_))
        ));
    }

    #[test]
    fn test_decode_content_length_allows_nul_in_body() {
        let frames = decode_all("MESSAGE\ncontent-length:3\n\na\0b\0").unwrap();
        assert_eq!(frames[0].body, "a\0b");
    }

    #[test]
    fn test_decode_content_length_mismatch() {
        assert!(matches!(
            decode_all("MESSAGE\ncontent-length:1\n\nabc\0"),
            Err(FrameError::InvalidContentLength(_))
        ));
    }

    #[test]
    fn test_decode_skips_heartbeats_and_crlf() {
        let wire = "\n\r\nRECEIPT\r\nreceipt-id:7\r\n\r\n\0\nERROR\nmessage:denied\n\n\0\n";
        let frames = decode_all(wire).unwrap();

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].get("receipt-id"), Some("7"));
        assert_eq!(frames[1].command, Command::Error);
        assert_eq!(frames[1].error_detail(), "denied");
    }

    #[test]
    fn test_decode_heartbeat_only() {
        assert!(decode_all("\n").unwrap().is_empty());
    }

    #[test]
    fn test_decode_incomplete() {
        assert_eq!(decode_all("MESSAGE\nk:v\n\nbody"), Err(FrameError::Incomplete));
        assert_eq!(decode_all("MESSAGE\nk:v"), Err(FrameError::Incomplete));
    }

    #[test]
    fn test_decode_unknown_command() {
        assert_eq!(
            decode_all("HELLO\n\n\0"),
            Err(FrameError::UnknownCommand("HELLO".to_string()))
        );
    }

    #[test]
    fn test_first_repeated_header_wins() {
        let frames = decode_all("MESSAGE\nk:1\nk:2\n\n\0").unwrap();
        assert_eq!(frames[0].get("k"), Some("1"));
        assert_eq!(frames[0].headers.len(), 2);
    }

    #[test]
    fn test_error_detail_falls_back_to_body() {
        let frame = Frame::new(Command::Error).body("Access denied\n");
        assert_eq!(frame.error_detail(), "Access denied");
        assert_eq!(Frame::new(Command::Error).error_detail(), "server sent ERROR");
    }

    #[test]
    fn test_encoded_frame_decodes() {
        let frame = Frame::subscribe("sub-0", "/user/queue/notifications");
        assert_eq!(decode_all(&frame.encode()).unwrap(), vec![frame]);
    }
}
