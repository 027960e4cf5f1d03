use crate::core::progress::StepProgress;
use crate::types::{ExportError, ExportResult};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use zip::write::FileOptions;
use zip::CompressionMethod;

/// Packages export artifacts into a single deflate-compressed zip.
pub struct ArchiveBuilder;

impl ArchiveBuilder {
    /// Stream `files` into a zip at `output_path`, one entry per input named
    /// by its base filename. Inputs are copied one at a time, never loaded
    /// into memory together.
    pub fn build<P: AsRef<Path>>(
        files: &[PathBuf],
        output_path: P,
        mut progress: Option<&mut StepProgress>,
    ) -> ExportResult<PathBuf> {
        if files.is_empty() {
            return Err(ExportError::NothingToArchive);
        }

        let output_path = output_path.as_ref().to_path_buf();
        log::info!(
            "compressing {} files into {}",
            files.len(),
            output_path.display()
        );

        let mut archive = zip::ZipWriter::new(File::create(&output_path)?);
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

        for file in files {
            let name = file
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| {
                    ExportError::Processing(format!("unusable archive entry name: {}", file.display()))
                })?;
            archive.start_file(name, options)?;
            let mut reader = BufReader::new(File::open(file)?);
            io::copy(&mut reader, &mut archive)?;
            if let Some(progress) = progress.as_deref_mut() {
                progress.advance();
            }
        }

        archive.finish()?;
        log::info!("finished compressing into {}", output_path.display());
        Ok(output_path)
    }
}
