//! The incremental sync loop: window scheduling, the per-tick
//! extract → load → commit sequence, and the interval driver around it.

pub mod driver;
pub mod orchestrator;
pub mod policy;
pub mod window;

pub use driver::SyncDriver;
pub use orchestrator::{LoadedRows, SyncServices, TickOrchestrator, TickOutcome, TickPhase};
pub use policy::{LoadTarget, SyncPolicy};
pub use window::{next_window, BlockRange};
