//! Bandwidth controller (component F) and the stream contract it schedules
//! against (§4.4, §4.5).

pub mod controller;
pub mod stream;

pub use controller::BandwidthController;
pub use stream::{SharedStream, Stream, StreamRegistration};
