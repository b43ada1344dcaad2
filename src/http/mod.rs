//! HTTP parsing and URI rules (component E). The status-line/header
//! grammar itself is delegated to `httparse` and `url`; this module only
//! wraps them into the {InProgress, Done, Redirect, Error} contract the
//! downloader state machine needs.

pub mod response;
pub mod uri;

pub use response::{BodyStatus, BodyTracker, Headers, ParseStep, ResponseParser};
pub use uri::Uri;
