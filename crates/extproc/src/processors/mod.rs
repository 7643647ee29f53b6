//! The six processors realizing components C–G of the design, plus the
//! base no-op processor every phase defaults to on [`crate::dispatcher::Processor`].

pub mod authn;
pub mod concurrtest;
pub mod digester;
pub mod idempotency;
pub mod logging;

/// The base processor: every phase continues unmodified. Selecting it at
/// startup (`-s BaseExternalProcessorService`) runs the gateway as a pure
/// pass-through, matching `BaseExternalProcessorService` in the original
/// service — useful as a health-check / wiring-verification deployment.
#[derive(Default)]
pub struct BaseProcessor;

#[async_trait::async_trait]
impl crate::dispatcher::Processor for BaseProcessor {}
