use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use dicom_object::FileMetaTable;
use snafu::{ensure, Backtrace, ResultExt, Snafu};
use tracing::{debug, info};

use crate::dataset::{self, Dataset};
use crate::layout::{self, ArchiveDir, ArchiveLayout};

/// The extension of stored instance files.
const FILE_EXTENSION: &str = "dcm";

/// Length of the file preamble.
const PREAMBLE_LENGTH: usize = 128;

/// Length of the File Meta Information Group Length element header
/// and value in explicit VR little endian.
const GROUP_LENGTH_ELEMENT_LENGTH: usize = 12;

/// Maximum length of a UID.
const MAX_UID_LENGTH: usize = 64;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Invalid SOP Instance UID {:?}", id))]
    InvalidInstanceId { id: String, backtrace: Backtrace },

    #[snafu(display("No instance stored as {}", id))]
    NotFound { id: String, backtrace: Backtrace },

    #[snafu(display("Could not prepare archive directory"))]
    PrepareLayout {
        #[snafu(backtrace)]
        source: layout::Error,
    },

    #[snafu(display("Could not create temporary file in {}", dir.display()))]
    CreateTempFile {
        dir: PathBuf,
        source: io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Could not write file meta group"))]
    WriteMeta {
        #[snafu(backtrace)]
        source: dicom_object::meta::Error,
    },

    #[snafu(display("Could not write instance data"))]
    WriteInstance {
        source: io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Could not move instance into place at {}", path.display()))]
    Persist {
        path: PathBuf,
        source: io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Could not read {}", path.display()))]
    ReadInstance {
        path: PathBuf,
        source: io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("File {} is not a DICOM file", path.display()))]
    NotDicom { path: PathBuf, backtrace: Backtrace },

    #[snafu(display("Could not read file meta group of {}", path.display()))]
    ReadMeta {
        path: PathBuf,
        #[snafu(backtrace)]
        source: dicom_object::meta::Error,
    },

    #[snafu(display("Could not decode instance {}", id))]
    DecodeInstance {
        id: String,
        #[snafu(backtrace)]
        source: dataset::Error,
    },

    #[snafu(display("Could not list instances in {}", dir.display()))]
    ListInstances {
        dir: PathBuf,
        source: io::Error,
        backtrace: Backtrace,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The on-disk record of a stored instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredInstance {
    /// the SOP Instance UID
    pub id: String,
    /// where the instance file lives
    pub path: PathBuf,
    /// the transfer syntax of the stored data set
    pub transfer_syntax: String,
    /// when the instance was committed to the store
    pub received: SystemTime,
}

/// Check that `id` is usable as an instance key,
/// returning it without any trailing padding.
///
/// Valid identifiers are non-empty UIDs
/// made of digits and dots only,
/// and no longer than 64 characters.
pub fn validate_instance_id(id: &str) -> Result<&str> {
    let trimmed = id.trim_end_matches(['\0', ' ']);
    ensure!(
        !trimmed.is_empty()
            && trimmed.len() <= MAX_UID_LENGTH
            && trimmed.bytes().all(|b| b.is_ascii_digit() || b == b'.')
            && !trimmed.starts_with('.')
            && !trimmed.ends_with('.'),
        InvalidInstanceIdSnafu { id }
    );
    Ok(trimmed)
}

/// A store of DICOM instances keyed by SOP Instance UID.
///
/// Each instance lives in its own file
/// whose name is derived from the identifier,
/// so lookups never scan the directory.
/// Storing an identifier a second time replaces the previous instance.
/// Both first writes and overwrites go through a temporary file
/// followed by a rename,
/// so concurrent readers see either the old or the new file in full.
#[derive(Debug, Clone)]
pub struct InstanceStore {
    dir: PathBuf,
}

impl InstanceStore {
    /// Open the instance store of an archive,
    /// creating its directory if needed.
    pub fn open(layout: &ArchiveLayout) -> Result<Self> {
        let dir = layout.create_dir(ArchiveDir::Instances).context(PrepareLayoutSnafu)?;
        Ok(InstanceStore { dir })
    }

    /// The directory holding the instance files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The file path of the instance with the given identifier.
    pub fn path_for(&self, id: &str) -> Result<PathBuf> {
        let id = validate_instance_id(id)?;
        Ok(self.dir.join(format!("{}.{}", id, FILE_EXTENSION)))
    }

    /// Persist a data set, replacing any instance stored under the same identifier.
    pub fn put(&self, dataset: &Dataset) -> Result<StoredInstance> {
        let id = validate_instance_id(dataset.sop_instance_uid())?.to_string();
        let path = self.path_for(&id)?;

        let mut file = tempfile::Builder::new()
            .prefix(".incoming-")
            .suffix(".part")
            .tempfile_in(&self.dir)
            .context(CreateTempFileSnafu { dir: &self.dir })?;

        file.write_all(&[0; PREAMBLE_LENGTH])
            .and_then(|_| file.write_all(b"DICM"))
            .context(WriteInstanceSnafu)?;
        dataset.meta().write(&mut file).context(WriteMetaSnafu)?;
        file.write_all(dataset.encoded())
            .and_then(|_| file.as_file().sync_all())
            .context(WriteInstanceSnafu)?;

        let replaced = path.exists();
        file.persist(&path)
            .map_err(|e| e.error)
            .context(PersistSnafu { path: &path })?;

        if replaced {
            info!("Replaced instance {}", id);
        } else {
            info!("Stored instance {}", id);
        }

        Ok(StoredInstance {
            id,
            path,
            transfer_syntax: dataset.transfer_syntax().to_string(),
            received: SystemTime::now(),
        })
    }

    /// Read back the instance stored under the given identifier.
    pub fn get(&self, id: &str) -> Result<Dataset> {
        let path = self.path_for(id)?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return NotFoundSnafu { id }.fail();
            }
            Err(e) => return Err(e).context(ReadInstanceSnafu { path }),
        };
        debug!("Read {} bytes from {}", bytes.len(), path.display());

        let (meta, offset) = split_meta(&bytes, &path)?;
        let encoded = bytes[offset..].to_vec();
        Dataset::from_encoded(meta, encoded).context(DecodeInstanceSnafu { id })
    }

    /// Whether an instance is stored under the given identifier.
    pub fn contains(&self, id: &str) -> Result<bool> {
        Ok(self.path_for(id)?.is_file())
    }

    /// Enumerate the identifiers of all stored instances, in ascending order.
    pub fn list(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.dir).context(ListInstancesSnafu { dir: &self.dir })?;
        let mut ids = Vec::new();
        for entry in entries {
            let path = entry.context(ListInstancesSnafu { dir: &self.dir })?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(FILE_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if validate_instance_id(stem).is_ok() && path.is_file() {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// The on-disk record of a stored instance.
    pub fn record(&self, id: &str) -> Result<StoredInstance> {
        let dataset = self.get(id)?;
        let path = self.path_for(id)?;
        let received = fs::metadata(&path)
            .and_then(|m| m.modified())
            .context(ReadInstanceSnafu { path: &path })?;
        Ok(StoredInstance {
            id: validate_instance_id(id)?.to_string(),
            path,
            transfer_syntax: dataset.transfer_syntax().to_string(),
            received,
        })
    }
}

/// Parse the file meta group of a DICOM file held in memory,
/// returning it along with the offset of the data set.
fn split_meta(bytes: &[u8], path: &Path) -> Result<(FileMetaTable, usize)> {
    let header_end = PREAMBLE_LENGTH + 4 + GROUP_LENGTH_ELEMENT_LENGTH;
    ensure!(
        bytes.len() >= header_end && &bytes[PREAMBLE_LENGTH..PREAMBLE_LENGTH + 4] == b"DICM",
        NotDicomSnafu { path }
    );
    let mut group_length = [0; 4];
    group_length.copy_from_slice(&bytes[header_end - 4..header_end]);
    let offset = header_end + u32::from_le_bytes(group_length) as usize;
    ensure!(offset <= bytes.len(), NotDicomSnafu { path });

    let meta = FileMetaTable::from_reader(&bytes[PREAMBLE_LENGTH..offset])
        .context(ReadMetaSnafu { path })?;
    Ok((meta, offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("1.2.840.10008.5.1.4.1.1.7", "1.2.840.10008.5.1.4.1.1.7")]
    #[case("1.2.3.4\0", "1.2.3.4")]
    #[case("2.25.1234 ", "2.25.1234")]
    fn valid_instance_ids(#[case] id: &str, #[case] expected: &str) {
        assert_eq!(validate_instance_id(id).unwrap(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("\0")]
    #[case("../../etc/passwd")]
    #[case("1.2.3/4")]
    #[case(".1.2")]
    #[case("1.2.")]
    #[case("1.2.abc")]
    fn invalid_instance_ids(#[case] id: &str) {
        assert!(matches!(
            validate_instance_id(id),
            Err(Error::InvalidInstanceId { .. })
        ));
    }

    #[test]
    fn overlong_instance_id() {
        let id = "1.".repeat(32) + "1";
        assert!(id.len() > MAX_UID_LENGTH);
        assert!(validate_instance_id(&id).is_err());
    }

    #[test]
    fn split_meta_rejects_short_files() {
        let bytes = vec![0; 100];
        assert!(matches!(
            split_meta(&bytes, Path::new("x.dcm")),
            Err(Error::NotDicom { .. })
        ));
    }

    #[test]
    fn split_meta_rejects_missing_magic() {
        let bytes = vec![0; 300];
        assert!(matches!(
            split_meta(&bytes, Path::new("x.dcm")),
            Err(Error::NotDicom { .. })
        ));
    }
}
