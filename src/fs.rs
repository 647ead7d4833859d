//! The namespace facade: a mounted [`Volume`] plus permission-gated
//! [`Folder`] and [`File`] handles.
//!
//! Handles are cheap ids, not cached state: every call rematerializes the
//! record from page bytes, mutates, and flushes. Two handles to the same
//! page are independent snapshots; the single-writer assumption makes
//! that safe. A handle carries the page-id chain of its ancestors, so
//! paths and parents are recomputed from the persisted page graph on
//! demand and no parent pointer is ever stored on disk.

use std::sync::Arc;

use log::debug;

use crate::bitmap::{allocate, free_page, free_page_count};
use crate::config::*;
use crate::error::{FsError, Result};
use crate::file::{append_all, free_file, read_all, write_all, FileRecord};
use crate::folder::{
    add_child, child_ids, children_with_tag, find_child, free_tree, remove_child, FolderRecord,
};
use crate::layout::{check_name, check_name_within};
use crate::store::PageStore;
use crate::superblock::{password_digest, Superblock, UserSlot};

/// A mounted volume: the page store plus the in-memory superblock mirror.
pub struct Volume<D: PageStore> {
    device: Arc<D>,
    sb: Superblock,
}

impl<D: PageStore> Volume<D> {
    /// Mounts the device, formatting it first if page 0 is not a
    /// superblock yet.
    pub fn mount(device: Arc<D>) -> Result<Self> {
        let sb = Superblock::load_or_format(&*device)?;
        Ok(Volume { device, sb })
    }

    /// Flushes volume state and releases the device.
    pub fn close(self) -> Result<()> {
        self.sb.flush(&*self.device)?;
        self.device.flush()?;
        self.device.unload();
        Ok(())
    }

    pub fn device(&self) -> Arc<D> {
        Arc::clone(&self.device)
    }

    /// Number of currently free pages, counted from the bitmap.
    pub fn free_pages(&self) -> Result<u32> {
        free_page_count(&*self.device)
    }

    /// Verifies the credentials and returns the user's root folder.
    pub fn login(&mut self, username: &str, password: &str) -> Result<Folder> {
        let slot = self
            .sb
            .find_user(username)
            .ok_or(FsError::BadCredentials)?;
        if self.sb.users[slot].digest != password_digest(password) {
            return Err(FsError::BadCredentials);
        }
        Ok(Folder {
            page: self.sb.users[slot].root,
            ancestors: Vec::new(),
        })
    }

    /// Creates an account with a fresh root folder. Fails with
    /// [`FsError::NameTaken`] on a duplicate username,
    /// [`FsError::UserTableFull`] when all seven slots are in use, and
    /// [`FsError::OutOfSpace`] when no root page can be allocated.
    pub fn register(&mut self, username: &str, password: &str) -> Result<()> {
        check_name_within(username, MAX_USERNAME_LEN)?;
        if self.sb.find_user(username).is_some() {
            return Err(FsError::NameTaken);
        }
        let slot = self.sb.free_slot().ok_or(FsError::UserTableFull)?;
        let root = allocate(&*self.device, &mut self.sb)?.ok_or(FsError::OutOfSpace)?;
        // The load-or-init path persists the fresh root folder record.
        FolderRecord::load(&*self.device, root)?;
        self.sb.users[slot] = UserSlot {
            name: username.to_string(),
            digest: password_digest(password),
            root,
        };
        self.sb.flush(&*self.device)?;
        debug!("registered user {username:?} with root page {root}");
        Ok(())
    }

    /// Deletes the account and recursively frees its whole folder subtree.
    pub fn remove_user(&mut self, username: &str) -> Result<()> {
        let slot = self.sb.find_user(username).ok_or(FsError::NotFound)?;
        let root = self.sb.users[slot].root;
        free_tree(&*self.device, &mut self.sb, root)?;
        self.sb.users[slot].clear();
        self.sb.flush(&*self.device)?;
        debug!("removed user {username:?}");
        Ok(())
    }
}

fn path_of<D: PageStore>(fs: &Volume<D>, ancestors: &[u16], leaf: &str) -> Result<String> {
    let mut path = String::new();
    for &id in ancestors.iter().skip(1) {
        path.push('/');
        path.push_str(&FolderRecord::load(&*fs.device, id)?.name);
    }
    path.push('/');
    path.push_str(leaf);
    Ok(path)
}

/// Handle to a folder page. The ancestor chain runs root-first and never
/// includes the folder itself; a root folder has an empty chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folder {
    page: u16,
    ancestors: Vec<u16>,
}

impl Folder {
    fn chain_with_self(&self) -> Vec<u16> {
        let mut chain = self.ancestors.clone();
        chain.push(self.page);
        chain
    }

    pub fn is_root(&self) -> bool {
        self.ancestors.is_empty()
    }

    pub fn parent(&self) -> Option<Folder> {
        self.ancestors.split_last().map(|(&page, rest)| Folder {
            page,
            ancestors: rest.to_vec(),
        })
    }

    pub fn name<D: PageStore>(&self, fs: &Volume<D>) -> Result<String> {
        Ok(FolderRecord::load(&*fs.device, self.page)?.name)
    }

    /// Last-modified time in seconds since the Unix epoch.
    pub fn modified<D: PageStore>(&self, fs: &Volume<D>) -> Result<i64> {
        Ok(FolderRecord::load(&*fs.device, self.page)?.mtime)
    }

    pub fn can_read<D: PageStore>(&self, fs: &Volume<D>) -> Result<bool> {
        Ok(FolderRecord::load(&*fs.device, self.page)?.can_read)
    }

    pub fn can_write<D: PageStore>(&self, fs: &Volume<D>) -> Result<bool> {
        Ok(FolderRecord::load(&*fs.device, self.page)?.can_write)
    }

    pub fn set_can_read<D: PageStore>(&self, fs: &Volume<D>, value: bool) -> Result<()> {
        let mut rec = FolderRecord::load(&*fs.device, self.page)?;
        rec.can_read = value;
        rec.flush(&*fs.device)
    }

    pub fn set_can_write<D: PageStore>(&self, fs: &Volume<D>, value: bool) -> Result<()> {
        let mut rec = FolderRecord::load(&*fs.device, self.page)?;
        rec.can_write = value;
        rec.flush(&*fs.device)
    }

    /// Absolute path, rebuilt by walking the ancestor chain. Roots render
    /// as `/`.
    pub fn path<D: PageStore>(&self, fs: &Volume<D>) -> Result<String> {
        if self.is_root() {
            return Ok("/".to_string());
        }
        path_of(fs, &self.ancestors, &self.name(fs)?)
    }

    pub fn is_empty<D: PageStore>(&self, fs: &Volume<D>) -> Result<bool> {
        let rec = FolderRecord::load(&*fs.device, self.page)?;
        Ok(child_ids(&*fs.device, &rec)?.is_empty())
    }

    /// Creates an empty file in this folder. Write permission on the
    /// folder is required; name collisions are the caller's concern.
    pub fn create_file<D: PageStore>(&self, fs: &mut Volume<D>, name: &str) -> Result<File> {
        let page = self.create_child(fs, name)?;
        let mut rec = FileRecord::load(&*fs.device, page)?;
        rec.name = name.to_string();
        rec.flush(&*fs.device)?;
        Ok(File {
            page,
            ancestors: self.chain_with_self(),
        })
    }

    /// Creates an empty subfolder. Same contract as [`Folder::create_file`].
    pub fn create_folder<D: PageStore>(&self, fs: &mut Volume<D>, name: &str) -> Result<Folder> {
        let page = self.create_child(fs, name)?;
        let mut rec = FolderRecord::load(&*fs.device, page)?;
        rec.name = name.to_string();
        rec.flush(&*fs.device)?;
        Ok(Folder {
            page,
            ancestors: self.chain_with_self(),
        })
    }

    /// Allocates a child page and links it into the child table, undoing
    /// the allocation if linking fails.
    fn create_child<D: PageStore>(&self, fs: &mut Volume<D>, name: &str) -> Result<u16> {
        check_name(name)?;
        let mut rec = FolderRecord::load(&*fs.device, self.page)?;
        if !rec.can_write {
            return Err(FsError::PermissionDenied);
        }
        let page = allocate(&*fs.device, &mut fs.sb)?.ok_or(FsError::OutOfSpace)?;
        if let Err(e) = add_child(&*fs.device, &mut fs.sb, &mut rec, page) {
            free_page(&*fs.device, &mut fs.sb, page)?;
            return Err(e);
        }
        Ok(page)
    }

    pub fn contains_file<D: PageStore>(&self, fs: &Volume<D>, name: &str) -> Result<bool> {
        Ok(self.lookup(fs, TAG_FILE, name)?.is_some())
    }

    pub fn contains_folder<D: PageStore>(&self, fs: &Volume<D>, name: &str) -> Result<bool> {
        Ok(self.lookup(fs, TAG_FOLDER, name)?.is_some())
    }

    pub fn get_file<D: PageStore>(&self, fs: &Volume<D>, name: &str) -> Result<File> {
        let page = self.lookup(fs, TAG_FILE, name)?.ok_or(FsError::NotFound)?;
        Ok(File {
            page,
            ancestors: self.chain_with_self(),
        })
    }

    pub fn get_folder<D: PageStore>(&self, fs: &Volume<D>, name: &str) -> Result<Folder> {
        let page = self.lookup(fs, TAG_FOLDER, name)?.ok_or(FsError::NotFound)?;
        Ok(Folder {
            page,
            ancestors: self.chain_with_self(),
        })
    }

    /// All files in this folder, in child-table order (which carries no
    /// meaning). Requires read permission.
    pub fn files<D: PageStore>(&self, fs: &Volume<D>) -> Result<Vec<File>> {
        let rec = self.readable_record(fs)?;
        Ok(children_with_tag(&*fs.device, &rec, TAG_FILE)?
            .into_iter()
            .map(|page| File {
                page,
                ancestors: self.chain_with_self(),
            })
            .collect())
    }

    /// All subfolders. Requires read permission.
    pub fn folders<D: PageStore>(&self, fs: &Volume<D>) -> Result<Vec<Folder>> {
        let rec = self.readable_record(fs)?;
        Ok(children_with_tag(&*fs.device, &rec, TAG_FOLDER)?
            .into_iter()
            .map(|page| Folder {
                page,
                ancestors: self.chain_with_self(),
            })
            .collect())
    }

    fn readable_record<D: PageStore>(&self, fs: &Volume<D>) -> Result<FolderRecord> {
        let rec = FolderRecord::load(&*fs.device, self.page)?;
        if !rec.can_read {
            return Err(FsError::PermissionDenied);
        }
        Ok(rec)
    }

    fn lookup<D: PageStore>(&self, fs: &Volume<D>, tag: u8, name: &str) -> Result<Option<u16>> {
        let rec = self.readable_record(fs)?;
        find_child(&*fs.device, &rec, tag, name)
    }

    /// Deletes a file in this folder and frees its content chain. The
    /// file itself must be writable; the folder's own flags are not
    /// consulted, matching the record layout's delete semantics.
    pub fn delete_file<D: PageStore>(&self, fs: &mut Volume<D>, name: &str) -> Result<()> {
        let mut rec = FolderRecord::load(&*fs.device, self.page)?;
        let page = find_child(&*fs.device, &rec, TAG_FILE, name)?.ok_or(FsError::NotFound)?;
        if !FileRecord::load(&*fs.device, page)?.can_write {
            return Err(FsError::PermissionDenied);
        }
        remove_child(&*fs.device, &mut fs.sb, &mut rec, page)?;
        free_file(&*fs.device, &mut fs.sb, page)
    }

    /// Deletes a subfolder and recursively frees its entire subtree.
    /// The subfolder must be writable.
    pub fn delete_folder<D: PageStore>(&self, fs: &mut Volume<D>, name: &str) -> Result<()> {
        let mut rec = FolderRecord::load(&*fs.device, self.page)?;
        let page = find_child(&*fs.device, &rec, TAG_FOLDER, name)?.ok_or(FsError::NotFound)?;
        if !FolderRecord::load(&*fs.device, page)?.can_write {
            return Err(FsError::PermissionDenied);
        }
        remove_child(&*fs.device, &mut fs.sb, &mut rec, page)?;
        free_tree(&*fs.device, &mut fs.sb, page)
    }

    /// Renames the folder. Not permission-gated, unlike every other
    /// mutator; callers wanting stricter behavior check the write flag
    /// themselves.
    pub fn rename<D: PageStore>(&self, fs: &Volume<D>, new_name: &str) -> Result<()> {
        check_name(new_name)?;
        let mut rec = FolderRecord::load(&*fs.device, self.page)?;
        rec.name = new_name.to_string();
        rec.flush(&*fs.device)
    }

    /// Deletes this folder via its parent. Fails on a root folder.
    pub fn delete<D: PageStore>(&self, fs: &mut Volume<D>) -> Result<()> {
        let parent = self.parent().ok_or(FsError::PermissionDenied)?;
        let name = self.name(fs)?;
        parent.delete_folder(fs, &name)
    }
}

/// Handle to a file page. The ancestor chain runs root-first and ends
/// with the containing folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    page: u16,
    ancestors: Vec<u16>,
}

impl File {
    pub fn parent(&self) -> Option<Folder> {
        self.ancestors.split_last().map(|(&page, rest)| Folder {
            page,
            ancestors: rest.to_vec(),
        })
    }

    pub fn name<D: PageStore>(&self, fs: &Volume<D>) -> Result<String> {
        Ok(FileRecord::load(&*fs.device, self.page)?.name)
    }

    /// Last-modified time in seconds since the Unix epoch.
    pub fn modified<D: PageStore>(&self, fs: &Volume<D>) -> Result<i64> {
        Ok(FileRecord::load(&*fs.device, self.page)?.mtime)
    }

    /// Total content length in bytes.
    pub fn size<D: PageStore>(&self, fs: &Volume<D>) -> Result<u64> {
        Ok(FileRecord::load(&*fs.device, self.page)?.size.max(0) as u64)
    }

    pub fn can_read<D: PageStore>(&self, fs: &Volume<D>) -> Result<bool> {
        Ok(FileRecord::load(&*fs.device, self.page)?.can_read)
    }

    pub fn can_write<D: PageStore>(&self, fs: &Volume<D>) -> Result<bool> {
        Ok(FileRecord::load(&*fs.device, self.page)?.can_write)
    }

    pub fn set_can_read<D: PageStore>(&self, fs: &Volume<D>, value: bool) -> Result<()> {
        let mut rec = FileRecord::load(&*fs.device, self.page)?;
        rec.can_read = value;
        rec.flush(&*fs.device)
    }

    pub fn set_can_write<D: PageStore>(&self, fs: &Volume<D>, value: bool) -> Result<()> {
        let mut rec = FileRecord::load(&*fs.device, self.page)?;
        rec.can_write = value;
        rec.flush(&*fs.device)
    }

    pub fn path<D: PageStore>(&self, fs: &Volume<D>) -> Result<String> {
        path_of(fs, &self.ancestors, &self.name(fs)?)
    }

    /// Reads the whole content. Gated on the file's own read flag only;
    /// parent folder permissions do not apply to content access.
    pub fn read_bytes<D: PageStore>(&self, fs: &Volume<D>) -> Result<Vec<u8>> {
        let rec = FileRecord::load(&*fs.device, self.page)?;
        if !rec.can_read {
            return Err(FsError::PermissionDenied);
        }
        read_all(&*fs.device, &rec)
    }

    /// Reads the whole content as text, replacing invalid UTF-8.
    pub fn read_text<D: PageStore>(&self, fs: &Volume<D>) -> Result<String> {
        Ok(String::from_utf8_lossy(&self.read_bytes(fs)?).into_owned())
    }

    /// Replaces the whole content. Gated on the file's own write flag.
    pub fn write_bytes<D: PageStore>(&self, fs: &mut Volume<D>, data: &[u8]) -> Result<()> {
        let mut rec = self.writable_record(fs)?;
        write_all(&*fs.device, &mut fs.sb, &mut rec, data)
    }

    pub fn write_text<D: PageStore>(&self, fs: &mut Volume<D>, text: &str) -> Result<()> {
        self.write_bytes(fs, text.as_bytes())
    }

    /// Appends to the content. Gated on the file's own write flag.
    pub fn append_bytes<D: PageStore>(&self, fs: &mut Volume<D>, data: &[u8]) -> Result<()> {
        let mut rec = self.writable_record(fs)?;
        append_all(&*fs.device, &mut fs.sb, &mut rec, data)
    }

    pub fn append_text<D: PageStore>(&self, fs: &mut Volume<D>, text: &str) -> Result<()> {
        self.append_bytes(fs, text.as_bytes())
    }

    fn writable_record<D: PageStore>(&self, fs: &Volume<D>) -> Result<FileRecord> {
        let rec = FileRecord::load(&*fs.device, self.page)?;
        if !rec.can_write {
            return Err(FsError::PermissionDenied);
        }
        Ok(rec)
    }

    /// Renames the file. Not permission-gated, like [`Folder::rename`].
    pub fn rename<D: PageStore>(&self, fs: &Volume<D>, new_name: &str) -> Result<()> {
        check_name(new_name)?;
        let mut rec = FileRecord::load(&*fs.device, self.page)?;
        rec.name = new_name.to_string();
        rec.flush(&*fs.device)
    }

    /// Deletes this file via its parent folder.
    pub fn delete<D: PageStore>(&self, fs: &mut Volume<D>) -> Result<()> {
        let parent = self.parent().ok_or(FsError::NotFound)?;
        let name = self.name(fs)?;
        parent.delete_file(fs, &name)
    }
}
