//! Request head reading and parsing
//!
//! Only the small subset of HTTP needed to pull custom headers out of the
//! client's opening request. Header lines without a colon are skipped rather
//! than rejected, so clients that pad their request with junk still work.

use bytes::BytesMut;
use log::trace;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::common::{ProxyError, Result};

/// Blank line terminating the request head
pub const HEAD_DELIMITER: &[u8] = b"\r\n\r\n";

/// Line terminator
pub const CRLF: &str = "\r\n";

/// Ordered header list with case-insensitive lookup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    pairs: Vec<(String, String)>,
}

impl Headers {
    /// Wrap already trimmed `(name, value)` pairs
    pub fn new(pairs: Vec<(String, String)>) -> Self {
        Self { pairs }
    }

    /// First value whose name matches ignoring ASCII case
    pub fn get(&self, name: &str) -> Option<&str> {
        lookup(&self.pairs, name)
    }

    /// Like [`Headers::get`] with a fallback value
    pub fn get_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        find_header(&self.pairs, name, default)
    }

    /// Number of parsed header lines
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Find a header value by name
///
/// Case-insensitive exact match on the name; the first match wins.
/// Returns `default` when no header matches.
pub fn find_header<'a>(headers: &'a [(String, String)], name: &str, default: &'a str) -> &'a str {
    lookup(headers, name).unwrap_or(default)
}

/// First value whose name matches ignoring ASCII case
fn lookup<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Parsed request head
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    /// `<method> <path> <version>`, not validated beyond being present
    pub request_line: String,
    /// Header lines in arrival order
    pub headers: Headers,
}

/// Read the request head from a buffered stream
///
/// Consumes bytes up to and including the blank-line delimiter and nothing
/// more; whatever the client sent after it stays in the reader's buffer.
/// The delimiter may be split across any number of reads.
///
/// # Errors
///
/// `MalformedRequest` if the stream ends first or `max_bytes` arrive without
/// a delimiter.
pub async fn read_request_head<R>(reader: &mut R, max_bytes: usize) -> Result<BytesMut>
where
    R: AsyncBufRead + Unpin,
{
    let mut head = BytesMut::with_capacity(max_bytes.min(1024));

    loop {
        let held = head.len();
        // A delimiter spanning two reads starts within the last three bytes held
        let search_from = held.saturating_sub(HEAD_DELIMITER.len() - 1);

        let (consumed, end) = {
            let chunk = reader.fill_buf().await?;
            if chunk.is_empty() {
                return Err(ProxyError::MalformedRequest(format!(
                    "connection closed after {} bytes without end of headers",
                    held
                )));
            }

            let take = chunk.len().min(max_bytes - held);
            head.extend_from_slice(&chunk[..take]);
            trace!("Request head: read {} bytes, {} held", take, head.len());

            match find_delimiter(&head[search_from..]) {
                Some(pos) => {
                    let end = search_from + pos + HEAD_DELIMITER.len();
                    (end - held, Some(end))
                }
                None => (take, None),
            }
        };

        reader.consume(consumed);

        if let Some(end) = end {
            head.truncate(end);
            return Ok(head);
        }

        if head.len() >= max_bytes {
            return Err(ProxyError::MalformedRequest(format!(
                "no end of headers within {} bytes",
                max_bytes
            )));
        }
    }
}

fn find_delimiter(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(HEAD_DELIMITER.len())
        .position(|window| window == HEAD_DELIMITER)
}

/// Parse a request head
///
/// Bytes are decoded as ISO-8859-1, so any byte sequence decodes. Each header
/// line is split on its first colon and both sides are trimmed.
pub fn parse_request_head(raw: &[u8]) -> Result<RequestHead> {
    let text: String = raw.iter().map(|&b| char::from(b)).collect();
    let mut lines = text.split(CRLF);

    let request_line = lines.next().unwrap_or_default().trim();
    if request_line.is_empty() {
        return Err(ProxyError::MalformedRequest("empty request line".to_string()));
    }

    let pairs = lines
        .filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            Some((name.trim().to_string(), value.trim().to_string()))
        })
        .collect();

    Ok(RequestHead {
        request_line: request_line.to_string(),
        headers: Headers::new(pairs),
    })
}
