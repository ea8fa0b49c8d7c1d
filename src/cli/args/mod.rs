//! Shared CLI argument types

mod common;
mod global;

pub use common::{CategoryArg, OutputFormat};
pub use global::GlobalOptions;
