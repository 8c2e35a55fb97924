//! Batch conversion of archived instances.
//!
//! Each instance is converted on its own:
//! a failure is recorded in the [`BatchReport`] and the batch moves on.
//! Cancellation is checked between instances.
use std::io::Write;
use std::path::{Path, PathBuf};

use dicom_archive_store::{ArchiveDir, ArchiveLayout, InstanceStore};
use snafu::ResultExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::decode::decode;
use crate::encode::{encode, EncodeOptions, StillFormat, TargetFormat, VideoFormat};
use crate::{
    DecodeSnafu, Error, ListInstancesSnafu, PrepareOutputSnafu, ReadInstanceSnafu, Result,
    WriteOutputSnafu,
};

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct BatchOptions {
    /// Format of single frame instances
    pub still_format: StillFormat,
    /// Format of multi-frame instances
    pub video_format: VideoFormat,
    pub encode: EncodeOptions,
}

impl Default for BatchOptions {
    fn default() -> Self {
        BatchOptions {
            still_format: StillFormat::Png,
            video_format: VideoFormat::Avi,
            encode: EncodeOptions::default(),
        }
    }
}

/// The outcome of converting one instance.
#[derive(Debug)]
pub struct BatchItem {
    pub instance_id: String,
    /// The output file, or why there is none
    pub outcome: Result<PathBuf>,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    /// One item per instance visited, in conversion order
    pub items: Vec<BatchItem>,
    /// Whether the batch stopped before visiting every instance
    pub cancelled: bool,
}

impl BatchReport {
    pub fn succeeded(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.items.iter().filter_map(|item| match &item.outcome {
            Ok(path) => Some((item.instance_id.as_str(), path.as_path())),
            Err(_) => None,
        })
    }

    pub fn failed(&self) -> impl Iterator<Item = (&str, &Error)> {
        self.items.iter().filter_map(|item| match &item.outcome {
            Ok(_) => None,
            Err(e) => Some((item.instance_id.as_str(), e)),
        })
    }

    pub fn has_failures(&self) -> bool {
        self.items.iter().any(|item| item.outcome.is_err())
    }
}

/// Convert every instance stored in the archive.
///
/// Fails only if the stored instances cannot be enumerated.
pub fn convert_archive(
    layout: &ArchiveLayout,
    options: &BatchOptions,
    cancel: &CancellationToken,
) -> Result<BatchReport> {
    let store = InstanceStore::open(layout).context(ListInstancesSnafu)?;
    let ids = store.list().context(ListInstancesSnafu)?;
    info!("Converting {} instance(s)", ids.len());

    let mut report = BatchReport::default();
    for id in ids {
        if cancel.is_cancelled() {
            info!(
                "Conversion cancelled after {} instance(s)",
                report.items.len()
            );
            report.cancelled = true;
            break;
        }

        let outcome = convert_instance(&store, layout, &id, options);
        match &outcome {
            Ok(path) => info!("Converted {} to {}", id, path.display()),
            Err(e) => warn!("Could not convert {}: {}", id, snafu::Report::from_error(e)),
        }
        report.items.push(BatchItem {
            instance_id: id,
            outcome,
        });
    }
    Ok(report)
}

/// Convert one stored instance,
/// writing a still image into the directory of its format,
/// or a video into the videos directory if it has multiple frames.
///
/// Returns the path of the output file.
pub fn convert_instance(
    store: &InstanceStore,
    layout: &ArchiveLayout,
    id: &str,
    options: &BatchOptions,
) -> Result<PathBuf> {
    let dataset = store.get(id).context(ReadInstanceSnafu { id })?;
    let pixels = decode(&dataset).context(DecodeSnafu)?.normalize();

    let (target, dir) = if pixels.is_sequence() {
        (TargetFormat::Video(options.video_format), ArchiveDir::Videos)
    } else {
        (
            TargetFormat::Still(options.still_format),
            options.still_format.archive_dir(),
        )
    };
    let bytes = encode(pixels, target, &options.encode)?;

    let dir = layout.create_dir(dir).context(PrepareOutputSnafu)?;
    let path = dir.join(format!("{}.{}", id, target.extension()));
    write_atomically(&dir, &path, &bytes)?;
    Ok(path)
}

/// Write a file through a temporary file in the same directory,
/// so that the final name only ever holds complete contents.
fn write_atomically(dir: &Path, path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = tempfile::Builder::new()
        .prefix(".converting-")
        .suffix(".part")
        .tempfile_in(dir)
        .context(WriteOutputSnafu { path })?;
    file.write_all(bytes)
        .and_then(|_| file.as_file().sync_all())
        .context(WriteOutputSnafu { path })?;
    file.persist(path)
        .map_err(|e| e.error)
        .context(WriteOutputSnafu { path })?;
    Ok(())
}
