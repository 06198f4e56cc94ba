pub mod backup;
pub mod collector;
pub mod compression;
pub mod config;
pub mod error;
pub mod index;
pub mod logging;
pub mod metadata;
pub mod naming;
pub mod progress;
pub mod restore;
pub mod retention;
pub mod signal;
pub mod utils;

pub use backup::{Backup, BackupOptions, BackupResult, Phase, ProgressCallback, UnitInfo};
pub use collector::{CollectionResult, Collector, FileEntry};
pub use compression::{
    ArchiveFormat, Backends, CompressionBackend, CompressionResult, SevenZipBackend,
    TarZstBackend, UnitSource, ZipBackend,
};
pub use config::{
    create_sample_config, default_config, dump_config, find_config_path, load_config,
    BackendPreference, BackupUnit, Config, UnitKind, ValidationResult,
};
pub use error::LifeboatError;
pub use index::{Index, IndexEntry};
pub use logging::init_logging;
pub use metadata::{load_metadata, save_metadata, Metadata};
pub use progress::{ProgressConfig, ProgressReporter};
pub use restore::{RestoreResult, LATEST};
pub use retention::{BackupStats, CleanupResult, RetentionManager};
pub use signal::{BackupContext, OperationGuard};
pub use utils::{calculate_size, format_size, parse_size};

/// Main library result type
pub type Result<T> = std::result::Result<T, LifeboatError>;
