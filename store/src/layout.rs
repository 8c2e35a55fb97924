//! Directory layout of an archive.
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use snafu::{Backtrace, ResultExt, Snafu};
use tracing::debug;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Could not create directory {}", path.display()))]
    CreateDir {
        path: PathBuf,
        source: io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Could not read directory {}", path.display()))]
    ReadDir {
        path: PathBuf,
        source: io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Could not remove {}", path.display()))]
    RemoveFile {
        path: PathBuf,
        source: io::Error,
        backtrace: Backtrace,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A subdirectory of the archive.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ArchiveDir {
    /// converted bitmap images
    Bmp,
    /// converted TIFF images
    Tiff,
    /// converted PNG images
    Png,
    /// converted JPEG images
    Jpeg,
    /// incoming DICOM instances
    Instances,
    /// converted multi-frame instances
    Videos,
}

impl ArchiveDir {
    pub const ALL: [ArchiveDir; 6] = [
        ArchiveDir::Bmp,
        ArchiveDir::Tiff,
        ArchiveDir::Png,
        ArchiveDir::Jpeg,
        ArchiveDir::Instances,
        ArchiveDir::Videos,
    ];

    /// The directory name under the archive root.
    pub fn name(self) -> &'static str {
        match self {
            ArchiveDir::Bmp => "BMP",
            ArchiveDir::Tiff => "TIF",
            ArchiveDir::Png => "PNG",
            ArchiveDir::Jpeg => "JPG",
            ArchiveDir::Instances => "DCM",
            ArchiveDir::Videos => "Videos",
        }
    }
}

/// An archive root directory
/// with one subdirectory per output format,
/// one for incoming instances,
/// and one for videos.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveLayout {
    root: PathBuf,
}

impl ArchiveLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ArchiveLayout { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self, dir: ArchiveDir) -> PathBuf {
        self.root.join(dir.name())
    }

    /// Ensure that the given subdirectory exists, returning its path.
    pub fn create_dir(&self, dir: ArchiveDir) -> Result<PathBuf> {
        let path = self.dir(dir);
        fs::create_dir_all(&path).context(CreateDirSnafu { path: &path })?;
        Ok(path)
    }

    /// Create the root directory and all subdirectories.
    pub fn create(&self) -> Result<()> {
        for dir in ArchiveDir::ALL {
            self.create_dir(dir)?;
        }
        Ok(())
    }

    /// Remove every file in the archive subdirectories,
    /// keeping the directories themselves.
    ///
    /// Returns the number of files removed.
    /// Subdirectories which do not exist are skipped.
    pub fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        for dir in ArchiveDir::ALL {
            let path = self.dir(dir);
            let entries = match fs::read_dir(&path) {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e).context(ReadDirSnafu { path }),
            };
            for entry in entries {
                let entry = entry.context(ReadDirSnafu { path: &path })?;
                let file_path = entry.path();
                if file_path.is_file() {
                    fs::remove_file(&file_path).context(RemoveFileSnafu { path: &file_path })?;
                    removed += 1;
                }
            }
            debug!("Cleared {}", path.display());
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_clear() {
        let root = tempfile::tempdir().unwrap();
        let layout = ArchiveLayout::new(root.path());
        layout.create().unwrap();
        for dir in ArchiveDir::ALL {
            assert!(layout.dir(dir).is_dir(), "{} should exist", dir.name());
        }

        fs::write(layout.dir(ArchiveDir::Png).join("a.png"), b"a").unwrap();
        fs::write(layout.dir(ArchiveDir::Instances).join("1.2.dcm"), b"b").unwrap();
        fs::write(layout.dir(ArchiveDir::Videos).join("1.3.gif"), b"c").unwrap();

        assert_eq!(layout.clear().unwrap(), 3);
        for dir in ArchiveDir::ALL {
            let path = layout.dir(dir);
            assert!(path.is_dir());
            assert_eq!(fs::read_dir(&path).unwrap().count(), 0);
        }
    }

    #[test]
    fn clear_skips_missing_directories() {
        let root = tempfile::tempdir().unwrap();
        let layout = ArchiveLayout::new(root.path());
        layout.create_dir(ArchiveDir::Jpeg).unwrap();
        fs::write(layout.dir(ArchiveDir::Jpeg).join("x.jpg"), b"x").unwrap();
        assert_eq!(layout.clear().unwrap(), 1);
    }
}
