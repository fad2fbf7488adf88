// Export modules for use in tests
pub mod clock;
pub mod event_source;
pub mod immersive;
pub mod main_app;
pub mod panic_handler;
pub mod preferences;
pub mod progress;
pub mod settings;
pub mod storage;
pub mod theme;
// Test utilities - only available when test-utils feature is enabled or during tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-export the core components
pub use immersive::{FullscreenHost, ImmersiveController, VisibilityState};
pub use main_app::{App, run_app_with_event_source};
pub use progress::{ProgressKey, ProgressPatch, ProgressRecord, ProgressSync};
pub use storage::{ChangeBus, KeyValueStore, PersistentCell};
