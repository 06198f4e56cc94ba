use super::{ArchiveFormat, CompressionBackend, CompressionResult, ItemProgress, UnitSource};
use crate::config::{CompressionConfig, Config};
use crate::error::LifeboatError;
use crate::Result;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::Path;
use tracing::{info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const BUFFER_SIZE: usize = 64 * 1024;

/// In-process zip archiver, always available.
///
/// Already-compressed files (per `skip_extensions`) are stored, everything
/// else is deflated.
#[derive(Debug, Clone)]
pub struct ZipBackend {
    compression: CompressionConfig,
}

impl ZipBackend {
    pub fn new(config: &Config) -> Self {
        Self {
            compression: config.compression.clone(),
        }
    }

    fn options_for(&self, name: &str, size: u64) -> SimpleFileOptions {
        let options = SimpleFileOptions::default().large_file(size >= u32::MAX as u64);
        if !self.compression.enabled || self.compression.should_skip(name) {
            options.compression_method(CompressionMethod::Stored)
        } else {
            options
                .compression_method(CompressionMethod::Deflated)
                .compression_level(Some(i64::from(self.compression.effective_level())))
        }
    }

    fn append_file(
        &self,
        writer: &mut ZipWriter<BufWriter<File>>,
        name: &str,
        source: &Path,
    ) -> Result<u64> {
        let file = File::open(source)?;
        let metadata = file.metadata()?;
        if !metadata.is_file() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "not a regular file").into());
        }
        let options = self.options_for(name, metadata.len());
        #[cfg(unix)]
        let options = {
            use std::os::unix::fs::PermissionsExt;
            options.unix_permissions(metadata.permissions().mode())
        };

        writer.start_file(name, options)?;
        let mut reader = BufReader::with_capacity(BUFFER_SIZE, file);
        match io::copy(&mut reader, writer) {
            Ok(written) => Ok(written),
            Err(e) => {
                // drop the partial entry so it never reaches the central directory
                if let Err(abort) = writer.abort_file() {
                    warn!(entry = name, error = %abort, "failed to discard partial zip entry");
                }
                Err(e.into())
            }
        }
    }
}

impl CompressionBackend for ZipBackend {
    fn name(&self) -> &'static str {
        "zip"
    }

    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::Zip
    }

    fn is_available(&self) -> bool {
        true
    }

    fn can_extract(&self, format: ArchiveFormat) -> bool {
        format == ArchiveFormat::Zip
    }

    fn compress_unit(
        &self,
        source: &UnitSource<'_>,
        archive_path: &Path,
        progress: ItemProgress<'_>,
    ) -> Result<CompressionResult> {
        let mut result = CompressionResult::new(archive_path, ArchiveFormat::Zip);
        let mut writer = ZipWriter::new(BufWriter::new(File::create(archive_path)?));

        for entry in source.entries {
            let name = entry.archive_name();

            if entry.is_dir {
                if let Err(e) = writer.add_directory(name.as_str(), SimpleFileOptions::default()) {
                    result.errors.push(format!("header error: {name}: {e}"));
                }
                continue;
            }

            match self.append_file(&mut writer, &name, &entry.source_path) {
                Ok(written) => {
                    result.original_size += written;
                    result.files_processed += 1;
                    progress(result.files_processed, &name);
                }
                Err(e) => {
                    warn!(path = %entry.source_path.display(), error = %e, "failed to add file");
                    result.errors.push(format!("copy error: {name}: {e}"));
                }
            }
        }

        let mut output = writer.finish()?;
        io::Write::flush(&mut output)?;
        drop(output);

        result.compressed_size = fs::metadata(archive_path)?.len();
        info!(
            unit = source.name,
            files = result.files_processed,
            original = result.original_size,
            compressed = result.compressed_size,
            "zip compression complete"
        );
        Ok(result)
    }

    fn extract(&self, archive_path: &Path, target: &Path, progress: ItemProgress<'_>) -> Result<()> {
        if ArchiveFormat::detect(archive_path) != Some(ArchiveFormat::Zip) {
            return Err(LifeboatError::UnsupportedArchive {
                path: archive_path.to_path_buf(),
            });
        }

        fs::create_dir_all(target)?;
        let mut archive = ZipArchive::new(BufReader::new(File::open(archive_path)?))
            .map_err(|e| LifeboatError::extraction(archive_path, e.to_string()))?;

        for i in 0..archive.len() {
            let mut file = archive
                .by_index(i)
                .map_err(|e| LifeboatError::extraction(archive_path, e.to_string()))?;
            let Some(relative) = file.enclosed_name() else {
                return Err(LifeboatError::extraction(
                    archive_path,
                    format!("entry escapes target directory: {}", file.name()),
                ));
            };
            let outpath = target.join(relative);

            if file.is_dir() {
                fs::create_dir_all(&outpath)?;
            } else {
                if let Some(parent) = outpath.parent() {
                    fs::create_dir_all(parent)?;
                }
                let mut output = BufWriter::new(File::create(&outpath)?);
                io::copy(&mut file, &mut output)
                    .and_then(|_| io::Write::flush(&mut output))
                    .map_err(|e| LifeboatError::extraction(archive_path, e.to_string()))?;
                drop(output);

                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    if let Some(mode) = file.unix_mode() {
                        fs::set_permissions(&outpath, fs::Permissions::from_mode(mode))?;
                    }
                }
            }

            progress(i + 1, file.name());
        }

        Ok(())
    }
}
