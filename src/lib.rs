//! pagefs is a small embedded file-storage engine: a multi-user
//! hierarchical namespace persisted entirely inside a fixed array of
//! 65536 pages of 256 bytes, emulating a simple block device.
//!
//! Volume layout (byte 0 of every page is a type tag):
//! - Page 0: superblock — version, allocation hint, quick-skip index,
//!   and a fixed table of 7 user accounts.
//! - Pages 1..=32: free-space bitmap, one bit per page id.
//! - Everything else: folder, file, and overflow records, linked into
//!   per-record chains.
//!
//! Layers, bottom to top:
//! 1. Page store: abstraction over the raw device. User/test implemented;
//!    [`MemStore`] and [`FileStore`] ship as references.
//! 2. Bitmap allocator: lowest-free-id allocation with a two-level
//!    quick-skip index over fully-allocated regions.
//! 3. Records: fixed 256-byte layouts for folders, files, and their
//!    overflow chains.
//! 4. Facade: [`Volume`] sessions and permission-gated [`Folder`] /
//!    [`File`] handles.
//!
//! Single-writer: no locking, no transactions, no crash atomicity
//! across multi-page updates.

mod bitmap;
mod config;
mod error;
mod file;
mod folder;
mod fs;
mod layout;
mod store;
mod superblock;

pub use config::*;
pub use error::FsError as Error;
pub use error::{FsError, Result};
pub use fs::{File, Folder, Volume};
pub use store::{FileStore, MemStore, PageStore};
pub use superblock::Superblock;
