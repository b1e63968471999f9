// Engine scaffolding the profiler subsystem hangs off of
//
// Databases own attachments; attachments own their profiler manager behind
// the engine-state mutex. Entering an attachment (`Attachment::enter`)
// yields the engine context every profiler mutation runs under, whether it
// comes from the executor, the remote listener or the flush timer.

pub mod attachment;
pub mod database;
pub mod lock;
pub mod timer;

pub use attachment::{Attachment, EngineContext, Privilege};
pub use database::Database;
pub use lock::LockManager;
pub use timer::FlushTimer;

pub type AttachmentId = u64;

/// Tick frequency of the elapsed-time counter handed to profiler plugins.
/// Elapsed times are measured with `std::time::Instant` and reported in
/// nanoseconds, so the frequency is a flat 1 GHz.
pub fn performance_frequency() -> u64 {
    1_000_000_000
}
