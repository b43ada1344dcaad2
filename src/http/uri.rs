//! URI decomposition rules (§6): scheme must be http/https, default ports
//! 80/443, missing path becomes `/`, and — for bug-compatibility with the
//! reference implementation this engine is modeled on — the fragment is
//! preserved in the outbound request path even though that is not RFC 7230
//! conformant.

use crate::error::EngineError;
use url::Url;

/// A parsed, request-ready URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uri {
    /// `http` or `https` (TLS is not implemented; https parses fine but the
    /// downloader refuses to run it — see `Uri::require_supported`).
    pub scheme: String,
    /// Hostname, used verbatim for the `Host:` header and for DNS lookup.
    pub host: String,
    /// Resolved port: explicit port, or the scheme default.
    pub port: u16,
    /// Path, query, and fragment concatenated into the string sent as the
    /// request-target. Never empty: an absent path becomes `/`.
    pub request_target: String,
}

impl Uri {
    /// Parses `raw` according to the rules in §6.
    pub fn parse(raw: &str) -> Result<Self, EngineError> {
        let url = Url::parse(raw)?;

        let scheme = url.scheme().to_string();
        let default_port = match scheme.as_str() {
            "http" => 80,
            "https" => 443,
            _ => return Err(EngineError::UnsupportedScheme(scheme)),
        };

        let host = url
            .host_str()
            .ok_or_else(|| EngineError::UnsupportedScheme(format!("{raw} has no host")))?
            .to_string();
        let port = url.port().unwrap_or(default_port);

        let mut request_target = String::new();
        let path = url.path();
        request_target.push_str(if path.is_empty() { "/" } else { path });
        if let Some(query) = url.query() {
            request_target.push('?');
            request_target.push_str(query);
        }
        // Non-conformant (RFC 7230 forbids a fragment in the request
        // target) but preserved for bug-compatibility with the reference
        // implementation — see SPEC_FULL.md open question.
        if let Some(fragment) = url.fragment() {
            request_target.push('#');
            request_target.push_str(fragment);
        }

        Ok(Self {
            scheme,
            host,
            port,
            request_target,
        })
    }

    /// Rejects schemes the engine cannot actually serve (https parses, but
    /// TLS is a non-goal).
    pub fn require_supported(&self) -> Result<(), EngineError> {
        match self.scheme.as_str() {
            "http" => Ok(()),
            other => Err(EngineError::UnsupportedScheme(other.to_string())),
        }
    }

    /// Renders the literal request line + Host header, per spec §6:
    /// `GET <target> HTTP/1.1\r\nHost: <host>\r\n\r\n`.
    pub fn request_bytes(&self) -> Vec<u8> {
        format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\n\r\n",
            self.request_target, self.host
        )
        .into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_port_and_root_path() {
        let uri = Uri::parse("http://example.com").unwrap();
        assert_eq!(uri.host, "example.com");
        assert_eq!(uri.port, 80);
        assert_eq!(uri.request_target, "/");
    }

    #[test]
    fn explicit_port_is_honored() {
        let uri = Uri::parse("http://example.com:8080/x").unwrap();
        assert_eq!(uri.port, 8080);
        assert_eq!(uri.request_target, "/x");
    }

    #[test]
    fn https_default_port() {
        let uri = Uri::parse("https://example.com/secure").unwrap();
        assert_eq!(uri.port, 443);
        assert!(uri.require_supported().is_err());
    }

    #[test]
    fn query_is_preserved() {
        let uri = Uri::parse("http://h/x?a=1&b=2").unwrap();
        assert_eq!(uri.request_target, "/x?a=1&b=2");
    }

    #[test]
    fn fragment_is_appended_to_request_target_for_bug_compatibility() {
        let uri = Uri::parse("http://h/x#frag").unwrap();
        assert_eq!(uri.request_target, "/x#frag");
    }

    #[test]
    fn unsupported_scheme_is_rejected() {
        let err = Uri::parse("ftp://h/x").unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedScheme(_)));
    }

    #[test]
    fn request_bytes_match_wire_format() {
        let uri = Uri::parse("http://h/x").unwrap();
        assert_eq!(uri.request_bytes(), b"GET /x HTTP/1.1\r\nHost: h\r\n\r\n");
    }
}
