//! Error handling foundation for leadflow.
//!
//! Crates define their own error enums. Service boundaries wrap them in a
//! rootcause `Report` so callers further up can attach their own context.

use rootcause::Report;

/// A Result type alias using rootcause's Report for error handling.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;
