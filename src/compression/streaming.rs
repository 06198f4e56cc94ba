use super::{ArchiveFormat, CompressionBackend, CompressionResult, ItemProgress, UnitSource};
use crate::config::Config;
use crate::error::LifeboatError;
use crate::Result;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read};
use std::path::Path;
use tar::{Archive, Builder, Header};
use tracing::{debug, info, warn};

/// Read buffer per file; bounds memory regardless of file size
const BUFFER_SIZE: usize = 64 * 1024;

/// In-process tar + zstd archiver.
///
/// Streams each file straight into the archive without an intermediate copy.
/// Also extracts legacy `.tar.gz` archives.
#[derive(Debug, Clone)]
pub struct TarZstBackend {
    level: i32,
}

impl TarZstBackend {
    pub fn new(config: &Config) -> Self {
        let level = if config.compression.enabled {
            config.compression.effective_level()
        } else {
            1
        };
        Self { level }
    }

    fn append_entries(
        &self,
        builder: &mut Builder<impl io::Write>,
        source: &UnitSource<'_>,
        result: &mut CompressionResult,
        progress: ItemProgress<'_>,
    ) {
        for entry in source.entries {
            let name = entry.archive_name();

            if entry.is_dir {
                if let Err(e) = builder.append_dir(&name, &entry.source_path) {
                    warn!(path = %entry.source_path.display(), error = %e, "failed to add directory");
                    result.errors.push(format!("header error: {name}: {e}"));
                }
                continue;
            }

            let file = match File::open(&entry.source_path) {
                Ok(file) => file,
                Err(e) => {
                    warn!(path = %entry.source_path.display(), error = %e, "failed to open file");
                    result.errors.push(format!("open error: {name}: {e}"));
                    continue;
                }
            };
            let metadata = match file.metadata() {
                Ok(metadata) => metadata,
                Err(e) => {
                    result.errors.push(format!("header error: {name}: {e}"));
                    continue;
                }
            };

            if !metadata.is_file() {
                warn!(path = %entry.source_path.display(), "skipping entry that is not a regular file");
                result.errors.push(format!("open error: {name}: not a regular file"));
                continue;
            }

            let mut header = Header::new_gnu();
            header.set_metadata(&metadata);
            header.set_size(metadata.len());
            header.set_cksum();

            let mut reader =
                PaddedReader::new(BufReader::with_capacity(BUFFER_SIZE, file), metadata.len());
            match builder.append_data(&mut header, &name, &mut reader) {
                Ok(()) => match reader.into_failure() {
                    None => {
                        result.original_size += metadata.len();
                        result.files_processed += 1;
                        progress(result.files_processed, &name);
                    }
                    Some(e) => {
                        warn!(path = %entry.source_path.display(), error = %e, "file changed while reading, entry zero-filled");
                        result.errors.push(format!("read error: {name}: {e}"));
                    }
                },
                Err(e) => {
                    warn!(path = %entry.source_path.display(), error = %e, "failed to add file");
                    result.errors.push(format!("copy error: {name}: {e}"));
                }
            }
        }
    }
}

/// Yields exactly `remaining` bytes so an entry always matches its header size.
///
/// A read error or early EOF is kept in `failure` and the rest of the entry
/// is zero-filled.
struct PaddedReader<R> {
    inner: R,
    remaining: u64,
    failure: Option<io::Error>,
}

impl<R: Read> PaddedReader<R> {
    fn new(inner: R, size: u64) -> Self {
        Self {
            inner,
            remaining: size,
            failure: None,
        }
    }

    fn into_failure(self) -> Option<io::Error> {
        self.failure
    }
}

impl<R: Read> Read for PaddedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let want = usize::try_from(self.remaining).map_or(buf.len(), |r| r.min(buf.len()));
        if want == 0 {
            return Ok(0);
        }
        let buf = &mut buf[..want];

        if self.failure.is_none() {
            match self.inner.read(buf) {
                Ok(0) => {
                    self.failure = Some(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "file shrank while reading",
                    ));
                }
                Ok(n) => {
                    self.remaining -= n as u64;
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => return Err(e),
                Err(e) => self.failure = Some(e),
            }
        }

        buf.fill(0);
        self.remaining -= want as u64;
        Ok(want)
    }
}

impl CompressionBackend for TarZstBackend {
    fn name(&self) -> &'static str {
        "zstd"
    }

    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::TarZst
    }

    fn is_available(&self) -> bool {
        true
    }

    fn can_extract(&self, format: ArchiveFormat) -> bool {
        matches!(format, ArchiveFormat::TarZst | ArchiveFormat::TarGz)
    }

    fn compress_unit(
        &self,
        source: &UnitSource<'_>,
        archive_path: &Path,
        progress: ItemProgress<'_>,
    ) -> Result<CompressionResult> {
        let mut result = CompressionResult::new(archive_path, ArchiveFormat::TarZst);

        let output = BufWriter::new(File::create(archive_path)?);
        let encoder = zstd::stream::write::Encoder::new(output, self.level)?;
        let mut builder = Builder::new(encoder);

        self.append_entries(&mut builder, source, &mut result, progress);

        let encoder = builder.into_inner()?;
        let mut output = encoder.finish()?;
        io::Write::flush(&mut output)?;
        drop(output);

        result.compressed_size = fs::metadata(archive_path)?.len();
        info!(
            unit = source.name,
            files = result.files_processed,
            original = result.original_size,
            compressed = result.compressed_size,
            "streaming compression complete"
        );
        Ok(result)
    }

    fn extract(&self, archive_path: &Path, target: &Path, progress: ItemProgress<'_>) -> Result<()> {
        let format = ArchiveFormat::detect(archive_path)
            .filter(|f| self.can_extract(*f))
            .ok_or_else(|| LifeboatError::UnsupportedArchive {
                path: archive_path.to_path_buf(),
            })?;

        fs::create_dir_all(target)?;
        let file = File::open(archive_path)?;

        let outcome = match format {
            ArchiveFormat::TarZst => {
                let decoder = zstd::stream::read::Decoder::new(file)?;
                unpack(Archive::new(decoder), target, progress)
            }
            _ => {
                let decoder = flate2::read::GzDecoder::new(BufReader::new(file));
                unpack(Archive::new(decoder), target, progress)
            }
        };

        outcome.map_err(|e| LifeboatError::extraction(archive_path, e.to_string()))?;
        debug!(archive = %archive_path.display(), target = %target.display(), "extracted archive");
        Ok(())
    }
}

fn unpack<R: Read>(mut archive: Archive<R>, target: &Path, progress: ItemProgress<'_>) -> io::Result<()> {
    archive.set_preserve_permissions(true);

    let mut count = 0;
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        if !entry.unpack_in(target)? {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("entry escapes target directory: {}", path.display()),
            ));
        }
        count += 1;
        progress(count, &path.to_string_lossy());
    }
    Ok(())
}
