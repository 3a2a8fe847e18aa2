//! Crate includes reusable utils for services that handle common behavior.
//! Such as initializing the tracing framework and whatever else.

pub mod env;
pub mod logging;
