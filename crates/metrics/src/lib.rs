//! Metric names for the skill lifecycle.
//!
//! Recording goes through the `metrics` facade, so nothing is exported until
//! the embedding process installs a recorder.
//!
//! ```rust,ignore
//! use alder_metrics::{counter, skills};
//!
//! counter!(skills::INSTALL_ATTEMPTS_TOTAL).increment(1);
//! ```

mod definitions;

pub use definitions::*;

pub use metrics::{counter, gauge, histogram};
