pub mod prelude;
pub mod telemetry;

pub use prelude::*;
