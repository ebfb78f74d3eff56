//! Geo Sift - IP collection, country classification and scanner hand-off
//!
//! Collects candidate IPs from a manual list and DNS, classifies them by
//! country, keeps the allowed ones for an external bandwidth scanner and
//! turns the scanner's results into a ranked proxy list.

pub mod config;
pub mod logging;
pub mod pipeline;

pub use config::Config;
pub use pipeline::*;

/// Application result type
pub type Result<T> = anyhow::Result<T>;
