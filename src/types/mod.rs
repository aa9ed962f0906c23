//! Type definitions for runtally

mod aggregation;
mod error;
mod run;

pub use aggregation::*;
pub use error::*;
pub use run::*;
