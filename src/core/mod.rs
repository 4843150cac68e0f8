pub mod engine;
pub mod file_state;
pub mod path;
pub mod scanner;
pub mod sync_loop;

pub use engine::{ScanReport, SyncConfig, SyncEngine};
pub use file_state::{ChangeDetection, FileRecord, FileRegistry, Observation};
pub use path::{join_remote, relative_path, to_portable_path};
pub use scanner::{walk_files, EXCLUDED_DIR_MARKER};
pub use sync_loop::{LoopSummary, SyncLoop, DEFAULT_INTERVAL};
