pub use crate::buf::*;
pub use crate::ids::*;
