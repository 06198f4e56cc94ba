//! Pluggable compression backends.
//!
//! Every backend turns the collected entries of one unit into a single archive
//! and can extract the archive formats it understands. Which backend writes new
//! archives is decided at runtime by [`Backends::probe`]: the external 7-Zip
//! tool when it can be found, then the in-process tar + zstd archiver, then the
//! in-process zip archiver.

pub mod fallback;
pub mod streaming;
pub mod subprocess;

use crate::collector::FileEntry;
use crate::config::{BackendPreference, Config};
use crate::error::LifeboatError;
use crate::signal::BackupContext;
use crate::Result;
use std::fmt;
use std::path::{Path, PathBuf};

pub use fallback::ZipBackend;
pub use streaming::TarZstBackend;
pub use subprocess::SevenZipBackend;

/// Archive container formats lifeboat reads or writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveFormat {
    TarZst,
    TarGz,
    Zip,
    SevenZip,
}

impl ArchiveFormat {
    pub const ALL: [ArchiveFormat; 4] = [
        ArchiveFormat::TarZst,
        ArchiveFormat::TarGz,
        ArchiveFormat::Zip,
        ArchiveFormat::SevenZip,
    ];

    /// File extension without the leading dot
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveFormat::TarZst => "tar.zst",
            ArchiveFormat::TarGz => "tar.gz",
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::SevenZip => "7z",
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            ArchiveFormat::TarZst => "tar+zstd",
            ArchiveFormat::TarGz => "tar+gzip",
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::SevenZip => "7z",
        }
    }

    /// Detect the format from a file name, double suffixes included
    pub fn detect(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_lowercase();
        if name.ends_with(".tar.zst") || name.ends_with(".tzst") {
            Some(ArchiveFormat::TarZst)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(ArchiveFormat::TarGz)
        } else if name.ends_with(".zip") {
            Some(ArchiveFormat::Zip)
        } else if name.ends_with(".7z") {
            Some(ArchiveFormat::SevenZip)
        } else {
            None
        }
    }

    /// Archive file name for a unit: `<stem>.<ext>`
    pub fn archive_file_name(&self, stem: &str) -> String {
        format!("{stem}.{}", self.extension())
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Outcome of compressing one unit
#[derive(Debug, Clone, PartialEq)]
pub struct CompressionResult {
    pub original_size: u64,
    pub compressed_size: u64,
    pub files_processed: usize,
    pub archive_path: PathBuf,
    pub format: ArchiveFormat,
    /// Per-file problems that did not stop the archive from being written
    pub errors: Vec<String>,
}

impl CompressionResult {
    pub fn new(archive_path: impl Into<PathBuf>, format: ArchiveFormat) -> Self {
        Self {
            original_size: 0,
            compressed_size: 0,
            files_processed: 0,
            archive_path: archive_path.into(),
            format,
            errors: Vec::new(),
        }
    }

    /// Compressed size as a percentage of the original size
    pub fn compression_ratio(&self) -> f64 {
        if self.original_size == 0 {
            return 0.0;
        }
        self.compressed_size as f64 / self.original_size as f64 * 100.0
    }

    /// Bytes saved; negative when the archive is larger than its input
    pub fn savings(&self) -> i64 {
        self.original_size as i64 - self.compressed_size as i64
    }
}

/// The entries of one unit, as produced by the collector
#[derive(Debug, Clone, Copy)]
pub struct UnitSource<'a> {
    pub name: &'a str,
    pub entries: &'a [FileEntry],
}

/// Per-item progress: (items done, current item name)
pub type ItemProgress<'a> = &'a mut dyn FnMut(usize, &str);

pub trait CompressionBackend {
    /// Short name, matching the `[compression] backend` setting
    fn name(&self) -> &'static str;

    /// Format of the archives this backend writes
    fn format(&self) -> ArchiveFormat;

    /// Whether this backend can run in the current environment
    fn is_available(&self) -> bool;

    fn can_extract(&self, format: ArchiveFormat) -> bool;

    /// Write every entry of `source` into a single archive at `archive_path`
    fn compress_unit(
        &self,
        source: &UnitSource<'_>,
        archive_path: &Path,
        progress: ItemProgress<'_>,
    ) -> Result<CompressionResult>;

    /// Extract `archive_path` into `target`; the format is taken from the file name
    fn extract(&self, archive_path: &Path, target: &Path, progress: ItemProgress<'_>) -> Result<()>;
}

/// The compression backends known to this process, in priority order
pub struct Backends {
    backends: Vec<Box<dyn CompressionBackend>>,
    preference: BackendPreference,
}

impl Backends {
    /// Build the backend list for a configuration. Availability is probed when
    /// a backend is requested, not at compile time.
    pub fn probe(config: &Config, context: &BackupContext) -> Self {
        let backends: Vec<Box<dyn CompressionBackend>> = vec![
            Box::new(SevenZipBackend::new(config, context.clone())),
            Box::new(TarZstBackend::new(config)),
            Box::new(ZipBackend::new(config)),
        ];
        Self::new(backends, config.compression.backend)
    }

    pub fn new(backends: Vec<Box<dyn CompressionBackend>>, preference: BackendPreference) -> Self {
        Self {
            backends,
            preference,
        }
    }

    /// Backend used for new archives: the preferred one, or the first available
    /// in priority order when the preference is `auto`
    pub fn active(&self) -> Result<&dyn CompressionBackend> {
        self.backends
            .iter()
            .filter(|b| {
                self.preference == BackendPreference::Auto || b.name() == self.preference.as_str()
            })
            .find(|b| b.is_available())
            .map(|b| b.as_ref())
            .ok_or(LifeboatError::NoBackendAvailable)
    }

    /// First available backend able to extract `format`, regardless of preference
    pub fn for_format(&self, format: ArchiveFormat) -> Option<&dyn CompressionBackend> {
        self.backends
            .iter()
            .find(|b| b.is_available() && b.can_extract(format))
            .map(|b| b.as_ref())
    }

    /// (name, available) for every known backend
    pub fn availability(&self) -> Vec<(&'static str, bool)> {
        self.backends
            .iter()
            .map(|b| (b.name(), b.is_available()))
            .collect()
    }
}

impl fmt::Debug for Backends {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backends")
            .field("backends", &self.availability())
            .field("preference", &self.preference)
            .finish()
    }
}

/// Reject archive member paths that would escape the extraction target
pub(crate) fn safe_join(target: &Path, member: &Path) -> Option<PathBuf> {
    use std::path::Component;

    let mut joined = target.to_path_buf();
    for component in member.components() {
        match component {
            Component::Normal(part) => joined.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(joined)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::collector::Collector;
    use crate::config::BackupUnit;
    use std::cell::Cell;

    /// A backend that records calls and always reports the configured availability
    pub(crate) struct StubBackend {
        pub name: &'static str,
        pub available: bool,
        pub formats: Vec<ArchiveFormat>,
        pub calls: Cell<usize>,
    }

    impl StubBackend {
        pub fn new(name: &'static str, available: bool, formats: &[ArchiveFormat]) -> Self {
            Self {
                name,
                available,
                formats: formats.to_vec(),
                calls: Cell::new(0),
            }
        }
    }

    impl CompressionBackend for StubBackend {
        fn name(&self) -> &'static str {
            self.name
        }

        fn format(&self) -> ArchiveFormat {
            self.formats[0]
        }

        fn is_available(&self) -> bool {
            self.available
        }

        fn can_extract(&self, format: ArchiveFormat) -> bool {
            self.formats.contains(&format)
        }

        fn compress_unit(
            &self,
            _source: &UnitSource<'_>,
            archive_path: &Path,
            _progress: ItemProgress<'_>,
        ) -> Result<CompressionResult> {
            self.calls.set(self.calls.get() + 1);
            Ok(CompressionResult::new(archive_path, self.format()))
        }

        fn extract(&self, _archive: &Path, _target: &Path, _progress: ItemProgress<'_>) -> Result<()> {
            self.calls.set(self.calls.get() + 1);
            Ok(())
        }
    }

    /// Collect a directory as a single unit for backend tests
    pub(crate) fn collect_unit(name: &str, path: &Path) -> Vec<FileEntry> {
        Collector::new().collect(&[BackupUnit::new(name, path)]).files
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(ArchiveFormat::detect(Path::new("a/app.tar.zst")), Some(ArchiveFormat::TarZst));
        assert_eq!(ArchiveFormat::detect(Path::new("APP.TAR.GZ")), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::detect(Path::new("app.tgz")), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::detect(Path::new("app.zip")), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::detect(Path::new("app.7z")), Some(ArchiveFormat::SevenZip));
        assert_eq!(ArchiveFormat::detect(Path::new("metadata.json")), None);
        assert_eq!(ArchiveFormat::detect(Path::new("app.tar")), None);
    }

    #[test]
    fn test_archive_file_name() {
        assert_eq!(ArchiveFormat::TarZst.archive_file_name("conf"), "conf.tar.zst");
        assert_eq!(ArchiveFormat::SevenZip.archive_file_name("conf"), "conf.7z");
        for format in ArchiveFormat::ALL {
            let name = format.archive_file_name("unit");
            assert_eq!(ArchiveFormat::detect(Path::new(&name)), Some(format));
        }
    }

    #[test]
    fn test_compression_ratio_and_savings() {
        let mut result = CompressionResult::new("/tmp/a.zip", ArchiveFormat::Zip);
        assert_eq!(result.compression_ratio(), 0.0);

        result.original_size = 1000;
        result.compressed_size = 250;
        assert_eq!(result.compression_ratio(), 25.0);
        assert_eq!(result.savings(), 750);

        result.compressed_size = 1200;
        assert_eq!(result.savings(), -200);
    }

    #[test]
    fn test_active_prefers_first_available_in_auto() {
        let backends = Backends::new(
            vec![
                Box::new(StubBackend::new("7z", false, &[ArchiveFormat::SevenZip])),
                Box::new(StubBackend::new("zstd", true, &[ArchiveFormat::TarZst])),
                Box::new(StubBackend::new("zip", true, &[ArchiveFormat::Zip])),
            ],
            BackendPreference::Auto,
        );

        assert_eq!(backends.active().unwrap().name(), "zstd");
    }

    #[test]
    fn test_explicit_preference_without_fallback() {
        let backends = Backends::new(
            vec![
                Box::new(StubBackend::new("7z", false, &[ArchiveFormat::SevenZip])),
                Box::new(StubBackend::new("zip", true, &[ArchiveFormat::Zip])),
            ],
            BackendPreference::SevenZip,
        );

        assert!(matches!(
            backends.active(),
            Err(LifeboatError::NoBackendAvailable)
        ));
    }

    #[test]
    fn test_no_backend_available() {
        let backends = Backends::new(Vec::new(), BackendPreference::Auto);
        assert!(matches!(
            backends.active(),
            Err(LifeboatError::NoBackendAvailable)
        ));
    }

    #[test]
    fn test_for_format_ignores_preference() {
        let backends = Backends::new(
            vec![
                Box::new(StubBackend::new("7z", false, &[ArchiveFormat::SevenZip])),
                Box::new(StubBackend::new(
                    "zstd",
                    true,
                    &[ArchiveFormat::TarZst, ArchiveFormat::TarGz],
                )),
                Box::new(StubBackend::new("zip", true, &[ArchiveFormat::Zip])),
            ],
            BackendPreference::Fallback,
        );

        assert_eq!(backends.for_format(ArchiveFormat::TarGz).unwrap().name(), "zstd");
        assert_eq!(backends.for_format(ArchiveFormat::Zip).unwrap().name(), "zip");
        assert!(backends.for_format(ArchiveFormat::SevenZip).is_none());
    }

    #[test]
    fn test_detection_always_has_in_process_backends() {
        let mut config = Config::default();
        config.seven_zip.path = Some(PathBuf::from("/nonexistent/7z"));
        config.compression.backend = BackendPreference::Streaming;

        let backends = Backends::probe(&config, &BackupContext::new());
        assert_eq!(backends.active().unwrap().name(), "zstd");
        assert!(backends.for_format(ArchiveFormat::Zip).is_some());
        assert_eq!(backends.availability().len(), 3);
    }

    #[test]
    fn test_safe_join() {
        let target = Path::new("/restore");
        assert_eq!(
            safe_join(target, Path::new("conf/server.xml")),
            Some(PathBuf::from("/restore/conf/server.xml"))
        );
        assert_eq!(
            safe_join(target, Path::new("./a")),
            Some(PathBuf::from("/restore/a"))
        );
        assert_eq!(safe_join(target, Path::new("../etc/passwd")), None);
        assert_eq!(safe_join(target, Path::new("/etc/passwd")), None);
    }
}
