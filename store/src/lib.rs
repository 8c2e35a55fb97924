//! Durable storage of DICOM instances received by the archive.
//!
//! An archive is a root directory laid out by [`ArchiveLayout`]:
//! incoming instances are kept as DICOM files under `DCM`,
//! and converted outputs are written to one directory per target format.
//!
//! [`InstanceStore`] is the component that persists [`Dataset`]s
//! keyed by their SOP Instance UID.
//! Every write goes to a temporary file in the same directory
//! which is then renamed over the final name,
//! so readers never observe a partially written instance.
//!
//! # Example
//!
//! ```no_run
//! # use dicom_archive_store::{ArchiveLayout, InstanceStore};
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let layout = ArchiveLayout::new("/var/lib/archive");
//! layout.create()?;
//! let store = InstanceStore::open(&layout)?;
//! for id in store.list()? {
//!     let dataset = store.get(&id)?;
//!     println!("{}: {}", id, dataset.sop_class_uid());
//! }
//! # Ok(())
//! # }
//! ```
pub mod dataset;
pub mod layout;
mod instance;

pub use dataset::Dataset;
pub use instance::{validate_instance_id, Error, InstanceStore, Result, StoredInstance};
pub use layout::{ArchiveDir, ArchiveLayout};
