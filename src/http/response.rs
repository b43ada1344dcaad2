//! Incremental HTTP/1.1 response parsing (component E), delegated to the
//! `httparse` crate for the status-line/header grammar rather than
//! hand-rolled, per §6.

use super::uri::Uri;

const MAX_HEADERS: usize = 64;

/// Parsed headers, once a complete status-line + header block has arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Headers {
    /// HTTP status code.
    pub status: u16,
    /// `Content-Length`, or `0` if absent — per spec's open question, `0`
    /// is overloaded to mean "unknown" and is surfaced to the dashboard as
    /// such rather than guessed at.
    pub content_length: u64,
    /// Redirect target, present only for a 3xx status with a `Location`
    /// header.
    pub redirect: Option<Uri>,
    /// Number of bytes of `buf` (passed to [`ResponseParser::feed`]) that
    /// belonged to the header block; any remaining bytes are body and
    /// must be delivered to the downloader's on-body path directly.
    pub consumed: usize,
}

/// Result of feeding one chunk of socket bytes to the parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseStep {
    /// The header block is not complete yet; buffer the chunk and wait for
    /// more data.
    NeedMoreData,
    /// The header block completed.
    Headers(Headers),
    /// The response was malformed.
    Error(String),
}

/// Whether the body (tracked by the downloader outside this parser, which
/// only does headers) has been fully received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyStatus {
    /// More bytes are expected.
    InProgress,
    /// The body is complete.
    Done,
}

/// Tracks body completion given a known-or-unknown content length. A
/// `content_length` of `0` means "unknown": completion is then driven by
/// the socket's `End` event (EOF-terminated body) rather than a byte count,
/// matching the "chunked beyond what the parser already handles" non-goal.
#[derive(Debug, Clone, Copy)]
pub struct BodyTracker {
    content_length: u64,
    received: u64,
}

impl BodyTracker {
    /// Creates a tracker for a response whose headers reported
    /// `content_length` (`0` = unknown).
    pub fn new(content_length: u64) -> Self {
        Self {
            content_length,
            received: 0,
        }
    }

    /// Records `n` newly-received body bytes.
    pub fn record(&mut self, n: u64) {
        self.received += n;
    }

    /// Total body bytes received so far.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// `Done` once `received >= content_length` for a known length; for an
    /// unknown length this never reports `Done` on its own — the caller
    /// must treat a socket `End` event as completion instead.
    pub fn status(&self) -> BodyStatus {
        if self.content_length > 0 && self.received >= self.content_length {
            BodyStatus::Done
        } else {
            BodyStatus::InProgress
        }
    }

    /// `true` when the content length is known ahead of time.
    pub fn length_known(&self) -> bool {
        self.content_length > 0
    }
}

/// Incremental parser for a single response's status-line and headers.
/// Body bytes are not parsed here; once [`ParseStep::Headers`] is returned
/// the caller switches to raw pass-through via [`BodyTracker`].
#[derive(Debug, Default)]
pub struct ResponseParser {
    buf: Vec<u8>,
}

impl ResponseParser {
    /// Creates an empty parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a freshly-read chunk. Internally buffers until a full header
    /// block (`\r\n\r\n`) has arrived, then delegates to `httparse`.
    pub fn feed(&mut self, chunk: &[u8]) -> ParseStep {
        self.buf.extend_from_slice(chunk);

        let mut headers_buf = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut response = httparse::Response::new(&mut headers_buf);

        match response.parse(&self.buf) {
            Ok(httparse::Status::Complete(consumed)) => {
                let status = response.code.unwrap_or(0);
                let mut content_length = 0u64;
                let mut redirect = None;

                for header in response.headers.iter() {
                    if header.name.eq_ignore_ascii_case("content-length") {
                        if let Ok(text) = std::str::from_utf8(header.value) {
                            if let Ok(len) = text.trim().parse::<u64>() {
                                content_length = len;
                            }
                        }
                    } else if header.name.eq_ignore_ascii_case("location") {
                        if let Ok(text) = std::str::from_utf8(header.value) {
                            if let Ok(uri) = Uri::parse(text.trim()) {
                                redirect = Some(uri);
                            }
                        }
                    }
                }

                if (300..400).contains(&status) && redirect.is_none() {
                    return ParseStep::Error(format!(
                        "redirect status {status} missing Location header"
                    ));
                }

                ParseStep::Headers(Headers {
                    status,
                    content_length,
                    redirect,
                    consumed,
                })
            }
            Ok(httparse::Status::Partial) => ParseStep::NeedMoreData,
            Err(e) => ParseStep::Error(e.to_string()),
        }
    }

    /// Bytes still buffered that were part of the same read as the header
    /// block but not yet handed back as body (used by the downloader to
    /// slice the trailing body bytes out after `Headers` is returned).
    pub fn buffered(&self) -> &[u8] {
        &self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_headers_and_splits_leading_body() {
        let mut parser = ResponseParser::new();
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 12\r\n\r\nHello world!";
        match parser.feed(raw) {
            ParseStep::Headers(headers) => {
                assert_eq!(headers.status, 200);
                assert_eq!(headers.content_length, 12);
                assert!(headers.redirect.is_none());
                assert_eq!(&raw[headers.consumed..], b"Hello world!");
            }
            other => panic!("expected Headers, got {other:?}"),
        }
    }

    #[test]
    fn partial_header_block_asks_for_more() {
        let mut parser = ResponseParser::new();
        assert_eq!(
            parser.feed(b"HTTP/1.1 200 OK\r\nContent-Le"),
            ParseStep::NeedMoreData
        );
        match parser.feed(b"ngth: 2\r\n\r\nOK") {
            ParseStep::Headers(headers) => assert_eq!(headers.content_length, 2),
            other => panic!("expected Headers, got {other:?}"),
        }
    }

    #[test]
    fn redirect_status_with_location_is_parsed() {
        let mut parser = ResponseParser::new();
        let raw = b"HTTP/1.1 302 Found\r\nLocation: http://h/y\r\n\r\n";
        match parser.feed(raw) {
            ParseStep::Headers(headers) => {
                assert_eq!(headers.status, 302);
                assert_eq!(headers.redirect.unwrap().request_target, "/y");
            }
            other => panic!("expected Headers, got {other:?}"),
        }
    }

    #[test]
    fn redirect_status_without_location_is_an_error() {
        let mut parser = ResponseParser::new();
        let raw = b"HTTP/1.1 302 Found\r\n\r\n";
        assert!(matches!(parser.feed(raw), ParseStep::Error(_)));
    }

    #[test]
    fn absent_content_length_means_unknown() {
        let mut parser = ResponseParser::new();
        let raw = b"HTTP/1.1 200 OK\r\n\r\nbody";
        match parser.feed(raw) {
            ParseStep::Headers(headers) => assert_eq!(headers.content_length, 0),
            other => panic!("expected Headers, got {other:?}"),
        }
    }

    #[test]
    fn body_tracker_completes_at_known_length() {
        let mut tracker = BodyTracker::new(5);
        assert_eq!(tracker.status(), BodyStatus::InProgress);
        tracker.record(3);
        assert_eq!(tracker.status(), BodyStatus::InProgress);
        tracker.record(2);
        assert_eq!(tracker.status(), BodyStatus::Done);
    }

    #[test]
    fn body_tracker_with_unknown_length_never_self_completes() {
        let mut tracker = BodyTracker::new(0);
        tracker.record(1_000_000);
        assert_eq!(tracker.status(), BodyStatus::InProgress);
        assert!(!tracker.length_known());
    }
}
