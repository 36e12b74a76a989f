//! Browser and extractor implementations.
//!
//! - [`HttpBrowser`] - plain HTTP driver over `reqwest`
//! - [`ProfileExtractor`] - CSS-selector extraction for profile pages
//! - [`discovery`] - people-search worklist discovery

pub mod discovery;
pub mod http;
pub mod profile;

pub use discovery::{profile_links, ProfileSearch};
pub use http::{cookie_header, HttpBrowser};
pub use profile::ProfileExtractor;
