//! Sticky-key sniffing on a raw, not-yet-routed connection.
//!
//! # Responsibilities
//! - Feed every byte read from the socket into an incremental request-head parser
//! - Stop reading as soon as the headers are complete
//! - Extract the sticky header (first comma-separated entry, trimmed)
//! - Return the exact bytes consumed so the worker can replay them
//!
//! # Design Decisions
//! - Never fails a connection: malformed heads, early EOF and oversized heads
//!   all fall back to the remote address
//! - Bytes read past the end of the head (e.g. a body in the same segment) are
//!   kept in the prelude; nothing read at the master is ever dropped

use std::net::IpAddr;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

/// Upper bound on header lines the sniffer parses.
const MAX_HEADERS: usize = 100;

const READ_CHUNK: usize = 4096;

/// Why sniffing gave up and used the remote address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SniffFailure {
    /// Not an HTTP/1 request head.
    Malformed,
    /// Head larger than the sniff limit.
    TooLarge,
    /// Client closed before the head was complete.
    Eof,
    /// Reading the socket failed.
    Io,
}

impl SniffFailure {
    pub fn as_str(self) -> &'static str {
        match self {
            SniffFailure::Malformed => "malformed",
            SniffFailure::TooLarge => "too_large",
            SniffFailure::Eof => "eof",
            SniffFailure::Io => "io",
        }
    }
}

/// Result of feeding the sniffer one more chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// Headers not complete yet.
    NeedMore,
    /// Headers complete. `value` is the normalised sticky header, if present and non-empty.
    Complete { value: Option<String>, head_len: usize },
    /// Parsing cannot succeed.
    Failed(SniffFailure),
}

/// Incremental request-head parser that remembers every byte it was fed.
#[derive(Debug)]
pub struct HeaderSniffer {
    header: String,
    limit: usize,
    consumed: Vec<u8>,
}

impl HeaderSniffer {
    /// `header` is matched case-insensitively.
    pub fn new(header: &str, limit: usize) -> Self {
        Self {
            header: header.to_ascii_lowercase(),
            limit,
            consumed: Vec::with_capacity(READ_CHUNK),
        }
    }

    /// Append a chunk and try to complete the head.
    pub fn feed(&mut self, chunk: &[u8]) -> Progress {
        self.consumed.extend_from_slice(chunk);

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut request = httparse::Request::new(&mut headers);
        match request.parse(&self.consumed) {
            Ok(httparse::Status::Complete(head_len)) => {
                let value = request
                    .headers
                    .iter()
                    .find(|h| h.name.eq_ignore_ascii_case(&self.header))
                    .and_then(|h| std::str::from_utf8(h.value).ok())
                    .and_then(first_entry);
                Progress::Complete { value, head_len }
            }
            Ok(httparse::Status::Partial) if self.consumed.len() >= self.limit => {
                Progress::Failed(SniffFailure::TooLarge)
            }
            Ok(httparse::Status::Partial) => Progress::NeedMore,
            Err(_) => Progress::Failed(SniffFailure::Malformed),
        }
    }

    /// Everything fed so far, in order.
    pub fn consumed(&self) -> &[u8] {
        &self.consumed
    }

    pub fn into_consumed(self) -> Vec<u8> {
        self.consumed
    }
}

/// First comma-separated entry of a header value, trimmed; `None` if empty.
fn first_entry(value: &str) -> Option<String> {
    let first = value.trim().split(',').next()?.trim();
    (!first.is_empty()).then(|| first.to_string())
}

/// Outcome of sniffing a connection.
#[derive(Debug)]
pub struct Sniffed {
    /// Resolved sticky key.
    pub key: String,
    /// Exact bytes read from the socket, to be replayed at the worker.
    pub prelude: Vec<u8>,
    /// Set when the key fell back to the remote address because sniffing failed.
    pub failure: Option<SniffFailure>,
    /// True when the key came from the header rather than the remote address.
    pub from_header: bool,
}

impl Sniffed {
    /// Why the remote address was used, if it was.
    pub fn fallback_reason(&self) -> Option<&'static str> {
        match self.failure {
            Some(failure) => Some(failure.as_str()),
            None if !self.from_header => Some("missing_header"),
            None => None,
        }
    }
}

/// Read from `stream` until the request head is complete and resolve the sticky key.
///
/// A missing or empty header resolves to `remote`, as does any sniffing failure.
pub async fn sniff_sticky_key(
    stream: &mut TcpStream,
    header: &str,
    remote: IpAddr,
    limit: usize,
) -> Sniffed {
    let mut sniffer = HeaderSniffer::new(header, limit);
    let mut chunk = vec![0u8; READ_CHUNK];

    let (value, failure) = loop {
        let n = match stream.read(&mut chunk).await {
            Ok(0) => break (None, Some(SniffFailure::Eof)),
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(error = %e, "Read failed while sniffing headers");
                break (None, Some(SniffFailure::Io));
            }
        };
        match sniffer.feed(&chunk[..n]) {
            Progress::NeedMore => continue,
            Progress::Complete { value, .. } => break (value, None),
            Progress::Failed(reason) => break (None, Some(reason)),
        }
    };

    let from_header = value.is_some();
    Sniffed {
        key: value.unwrap_or_else(|| remote.to_string()),
        prelude: sniffer.into_consumed(),
        failure,
        from_header,
    }
}
