// ============================================================
// Layer 6: Infrastructure Layer
// ============================================================
// Everything that touches the filesystem: locks, archives,
// checkpoint files, the workplace and the metrics log. Nothing in
// here knows about models or pipelines.

pub mod archive;
pub mod checkpoint;
pub mod io;
pub mod lock;
pub mod metrics;
pub mod registry;
pub mod workplace;

pub use archive::{compress, ExtractedScope};
pub use checkpoint::{CheckpointEntry, CheckpointSet};
pub use lock::{ExportLock, LockMode, LockOptions};
pub use registry::Registry;
pub use workplace::Workplace;
