//! Node configuration file.

mod config;

pub use config::*;
