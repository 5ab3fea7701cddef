//! Middleware built on the handler contract.

mod corf;
mod logging;

pub use corf::{Corf, OriginError};
pub use logging::logging;
