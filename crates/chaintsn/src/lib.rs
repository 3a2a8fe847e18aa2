//! Chain state transition.

pub mod errors;
pub mod transition;
