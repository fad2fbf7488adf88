pub mod record;
pub mod remote;
pub mod sync;

pub use record::{ProgressKey, ProgressPatch, ProgressRecord};
pub use remote::{HttpProgressStore, LocalOnly, MemoryRemoteStore, RemoteError, RemoteProgressStore};
pub use sync::{DEFAULT_SYNC_DEBOUNCE, ProgressSync, recent_progress};
