//! Luminosity bookkeeping for CMS runs.
//!
//! Per-lumisection delivered and recorded luminosity is pulled from the
//! luminosity database, cached in a flat text file, summed per run and per
//! acceptance scenario, and published as PNG plots and an HTML report.

pub mod aggregate;
pub mod cache;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod plot;
pub mod query;
pub mod report;

pub use aggregate::{Aggregator, RunTotals, Summary};
pub use cache::{LumiCache, LumiKey, LumiValue};
pub use config::Config;
pub use error::{LumiError, Result};
pub use pipeline::{LumiWeb, Options};
