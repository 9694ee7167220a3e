pub mod logging;
pub mod sequence;

pub use sequence::{MessageNumber, SequenceKey};
pub use tracing;

/// Lifecycle signals broadcast to long-running services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Finalised,
}
