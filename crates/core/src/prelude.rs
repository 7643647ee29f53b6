//! Common imports shared across the workspace, mirroring how a gateway-scale
//! crate keeps its most-used types one `use` away.

pub use std::sync::Arc;
pub use std::time::Duration;

pub use anyhow::{Context as _, Result};
pub use tracing::{Instrument, debug, error, info, instrument, trace, warn};
