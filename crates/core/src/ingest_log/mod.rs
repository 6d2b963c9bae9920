//! Structured log of every record the merge engine adds or updates.

mod events;
mod handle;
mod sink;
mod writer;

pub use events::*;
pub use handle::*;
pub use sink::*;
pub use writer::*;
