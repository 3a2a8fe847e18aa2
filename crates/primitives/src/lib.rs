//! Collection of generic internal data types that are used widely.

pub mod buf;
pub mod constants;
pub mod hash;
pub mod ids;
pub mod macros;
pub mod params;

pub mod prelude;
