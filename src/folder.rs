//! Folder records (tag 2) and their directory-overflow pages (tag 3).
//!
//! A folder keeps up to 106 child page ids inline; further children spill
//! into a singly linked chain of overflow pages holding 126 ids each.
//! Child order carries no meaning. A slot value of 0 means empty.

use bitflags::bitflags;
use log::debug;

use crate::bitmap::{allocate, free_page};
use crate::config::*;
use crate::error::{FsError, Result};
use crate::file::free_file;
use crate::layout::{pack_name, read_i64, read_u16, unix_now, unpack_name, write_i64, write_u16};
use crate::store::PageStore;
use crate::superblock::Superblock;

bitflags! {
    /// On-disk permission byte at offset 41 of folder and file pages.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct Perm: u8 {
        const WRITE = 0b01;
        const READ = 0b10;
    }
}

pub(crate) fn decode_perm(byte: u8) -> (bool, bool) {
    let perm = Perm::from_bits_truncate(byte);
    (perm.contains(Perm::READ), perm.contains(Perm::WRITE))
}

pub(crate) fn encode_perm(can_read: bool, can_write: bool) -> u8 {
    let mut perm = Perm::empty();
    if can_read {
        perm |= Perm::READ;
    }
    if can_write {
        perm |= Perm::WRITE;
    }
    perm.bits()
}

/// In-memory view of a folder page. Views are materialized fresh from
/// page bytes on every lookup and written back explicitly; nothing is
/// cached between calls.
#[derive(Debug, Clone)]
pub(crate) struct FolderRecord {
    pub page: u16,
    pub name: String,
    pub mtime: i64,
    pub can_read: bool,
    pub can_write: bool,
    pub children: [u16; FOLDER_SLOTS],
    pub next: u16,
}

impl FolderRecord {
    /// Decodes the page, or — on a freshly allocated zero-tag page —
    /// initializes defaults (current time, read and write allowed) and
    /// persists them immediately. This is the only implicit mutation in
    /// the system.
    pub fn load(device: &impl PageStore, page: u16) -> Result<FolderRecord> {
        let mut buf = [0u8; PAGE_SIZE];
        device.read_page(page, &mut buf)?;
        match buf[0] {
            TAG_FOLDER => {
                let (can_read, can_write) = decode_perm(buf[41]);
                let mut children = [0u16; FOLDER_SLOTS];
                for (i, slot) in children.iter_mut().enumerate() {
                    *slot = read_u16(&buf, 42 + i * 2);
                }
                Ok(FolderRecord {
                    page,
                    name: unpack_name(&buf[1..33]),
                    mtime: read_i64(&buf, 33),
                    can_read,
                    can_write,
                    children,
                    next: read_u16(&buf, 254),
                })
            }
            TAG_FREE => {
                let rec = FolderRecord {
                    page,
                    name: String::new(),
                    mtime: unix_now(),
                    can_read: true,
                    can_write: true,
                    children: [0; FOLDER_SLOTS],
                    next: 0,
                };
                rec.flush(device)?;
                Ok(rec)
            }
            _ => Err(FsError::BadPageTag(page)),
        }
    }

    pub fn flush(&self, device: &impl PageStore) -> Result<()> {
        let mut buf = [0u8; PAGE_SIZE];
        buf[0] = TAG_FOLDER;
        pack_name(&mut buf[1..33], &self.name);
        write_i64(&mut buf, 33, self.mtime);
        buf[41] = encode_perm(self.can_read, self.can_write);
        for (i, &slot) in self.children.iter().enumerate() {
            write_u16(&mut buf, 42 + i * 2, slot);
        }
        write_u16(&mut buf, 254, self.next);
        device.write_page(self.page, &buf)
    }
}

/// One directory-overflow page: 126 child-id slots and a link onward.
#[derive(Debug, Clone)]
pub(crate) struct ChildList {
    pub page: u16,
    pub slots: [u16; CHILD_LIST_SLOTS],
    pub next: u16,
}

impl ChildList {
    /// A freshly allocated page decodes as all-empty; it gets its tag
    /// when first flushed.
    pub fn load(device: &impl PageStore, page: u16) -> Result<ChildList> {
        let mut buf = [0u8; PAGE_SIZE];
        device.read_page(page, &mut buf)?;
        if buf[0] != TAG_CHILD_LIST && buf[0] != TAG_FREE {
            return Err(FsError::BadPageTag(page));
        }
        let mut slots = [0u16; CHILD_LIST_SLOTS];
        for (i, slot) in slots.iter_mut().enumerate() {
            *slot = read_u16(&buf, 1 + i * 2);
        }
        Ok(ChildList {
            page,
            slots,
            next: read_u16(&buf, 253),
        })
    }

    pub fn flush(&self, device: &impl PageStore) -> Result<()> {
        let mut buf = [0u8; PAGE_SIZE];
        buf[0] = TAG_CHILD_LIST;
        for (i, &slot) in self.slots.iter().enumerate() {
            write_u16(&mut buf, 1 + i * 2, slot);
        }
        write_u16(&mut buf, 253, self.next);
        device.write_page(self.page, &buf)
    }

    fn is_empty(&self) -> bool {
        self.slots.iter().all(|&s| s == 0)
    }
}

/// Records `child` in the first empty slot, growing the overflow chain by
/// one page if every slot in it is taken. If that growth allocation
/// fails, nothing is left half-linked and the failure propagates.
pub(crate) fn add_child(
    device: &impl PageStore,
    sb: &mut Superblock,
    folder: &mut FolderRecord,
    child: u16,
) -> Result<()> {
    if let Some(slot) = folder.children.iter().position(|&c| c == 0) {
        folder.children[slot] = child;
        folder.mtime = unix_now();
        folder.flush(device)?;
        return Ok(());
    }

    let mut cur = folder.next;
    if cur == 0 {
        let new_page = allocate(device, sb)?.ok_or(FsError::OutOfSpace)?;
        let mut list = ChildList::load(device, new_page)?;
        list.slots[0] = child;
        list.flush(device)?;
        folder.next = new_page;
        folder.mtime = unix_now();
        folder.flush(device)?;
        return Ok(());
    }
    loop {
        let mut list = ChildList::load(device, cur)?;
        if let Some(slot) = list.slots.iter().position(|&c| c == 0) {
            list.slots[slot] = child;
            list.flush(device)?;
            folder.mtime = unix_now();
            folder.flush(device)?;
            return Ok(());
        }
        if list.next == 0 {
            let new_page = allocate(device, sb)?.ok_or(FsError::OutOfSpace)?;
            let mut new_list = ChildList::load(device, new_page)?;
            new_list.slots[0] = child;
            new_list.flush(device)?;
            list.next = new_page;
            list.flush(device)?;
            folder.mtime = unix_now();
            folder.flush(device)?;
            return Ok(());
        }
        cur = list.next;
    }
}

/// Logical position of a child slot: inline in the folder page, or at an
/// index of a loaded overflow page.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Slot {
    Inline(usize),
    Over(usize, usize), // (chain index, slot index)
}

/// Drops `child` from the folder's child table. The hole is filled by
/// moving the last used entry anywhere in the chain into it, so used
/// slots stay front-packed; a terminal overflow page left empty is freed
/// and unlinked. Returns whether the child was present.
pub(crate) fn remove_child(
    device: &impl PageStore,
    sb: &mut Superblock,
    folder: &mut FolderRecord,
    child: u16,
) -> Result<bool> {
    let mut chain = Vec::new();
    let mut next = folder.next;
    while next != 0 {
        let list = ChildList::load(device, next)?;
        next = list.next;
        chain.push(list);
    }

    let target = folder
        .children
        .iter()
        .position(|&c| c == child)
        .map(Slot::Inline)
        .or_else(|| {
            chain.iter().enumerate().find_map(|(pi, list)| {
                list.slots
                    .iter()
                    .position(|&c| c == child)
                    .map(|si| Slot::Over(pi, si))
            })
        });
    let Some(target) = target else {
        return Ok(false);
    };

    // Last used entry in chain order: overflow pages from the tail first,
    // then the inline table.
    let last = chain
        .iter()
        .enumerate()
        .rev()
        .find_map(|(pi, list)| {
            list.slots
                .iter()
                .rposition(|&c| c != 0)
                .map(|si| Slot::Over(pi, si))
        })
        .or_else(|| {
            folder
                .children
                .iter()
                .rposition(|&c| c != 0)
                .map(Slot::Inline)
        })
        .expect("target slot exists, so some slot is used");

    let get = |folder: &FolderRecord, chain: &[ChildList], slot: Slot| match slot {
        Slot::Inline(i) => folder.children[i],
        Slot::Over(pi, si) => chain[pi].slots[si],
    };
    let set = |folder: &mut FolderRecord, chain: &mut [ChildList], slot: Slot, v: u16| match slot {
        Slot::Inline(i) => folder.children[i] = v,
        Slot::Over(pi, si) => chain[pi].slots[si] = v,
    };

    if last != target {
        let moved = get(folder, &chain, last);
        set(folder, &mut chain, target, moved);
    }
    set(folder, &mut chain, last, 0);

    // Free any terminal overflow pages left empty and unlink them from
    // their predecessor.
    while chain.last().is_some_and(|tail| tail.is_empty()) {
        let tail = chain.pop().expect("checked non-empty");
        if let Some(prev) = chain.last_mut() {
            prev.next = 0;
        } else {
            folder.next = 0;
        }
        free_page(device, sb, tail.page)?;
    }

    for list in &chain {
        list.flush(device)?;
    }
    folder.flush(device)?;
    Ok(true)
}

/// Every child page id recorded in the folder, inline slots first, then
/// the full overflow chain. Empty slots are skipped, not treated as
/// terminators.
pub(crate) fn child_ids(device: &impl PageStore, folder: &FolderRecord) -> Result<Vec<u16>> {
    let mut ids: Vec<u16> = folder.children.iter().copied().filter(|&c| c != 0).collect();
    let mut next = folder.next;
    while next != 0 {
        let list = ChildList::load(device, next)?;
        ids.extend(list.slots.iter().copied().filter(|&c| c != 0));
        next = list.next;
    }
    Ok(ids)
}

/// Child page ids whose record tag matches `tag`.
pub(crate) fn children_with_tag(
    device: &impl PageStore,
    folder: &FolderRecord,
    tag: u8,
) -> Result<Vec<u16>> {
    let mut out = Vec::new();
    let mut buf = [0u8; PAGE_SIZE];
    for id in child_ids(device, folder)? {
        device.read_page(id, &mut buf)?;
        if buf[0] == tag {
            out.push(id);
        }
    }
    Ok(out)
}

/// Finds a child of the given record tag by name. Folder and file pages
/// share the name field layout at bytes 1..33.
pub(crate) fn find_child(
    device: &impl PageStore,
    folder: &FolderRecord,
    tag: u8,
    name: &str,
) -> Result<Option<u16>> {
    let mut buf = [0u8; PAGE_SIZE];
    for id in child_ids(device, folder)? {
        device.read_page(id, &mut buf)?;
        if buf[0] == tag && unpack_name(&buf[1..33]) == name {
            return Ok(Some(id));
        }
    }
    Ok(None)
}

/// Recursively frees the whole subtree rooted at `page`: every live child
/// file and subfolder first, then the folder's own overflow chain, then
/// the folder page itself. Children whose tag is neither folder nor file
/// are dropped from traversal.
pub(crate) fn free_tree(device: &impl PageStore, sb: &mut Superblock, page: u16) -> Result<()> {
    let folder = FolderRecord::load(device, page)?;
    let mut buf = [0u8; PAGE_SIZE];
    for id in child_ids(device, &folder)? {
        device.read_page(id, &mut buf)?;
        match buf[0] {
            TAG_FOLDER => free_tree(device, sb, id)?,
            TAG_FILE => free_file(device, sb, id)?,
            _ => {}
        }
    }
    let mut next = folder.next;
    while next != 0 {
        let list = ChildList::load(device, next)?;
        free_page(device, sb, next)?;
        next = list.next;
    }
    free_page(device, sb, page)?;
    debug!("freed folder subtree rooted at page {page}");
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bitmap::free_page_count;
    use crate::store::MemStore;

    fn fresh_folder(device: &MemStore, sb: &mut Superblock) -> FolderRecord {
        let page = allocate(device, sb).unwrap().unwrap();
        FolderRecord::load(device, page).unwrap()
    }

    #[test]
    fn test_load_or_init_persists_defaults() {
        let store = MemStore::new();
        let mut sb = Superblock::load_or_format(&store).unwrap();
        let page = allocate(&store, &mut sb).unwrap().unwrap();
        let rec = FolderRecord::load(&store, page).unwrap();
        assert!(rec.can_read && rec.can_write);
        // The init path flushed, so a second load parses a real folder page.
        let again = FolderRecord::load(&store, page).unwrap();
        assert_eq!(again.mtime, rec.mtime);
        assert_eq!(again.name, "");
    }

    #[test]
    fn test_child_table_overflows_and_shrinks_back() {
        let store = MemStore::new();
        let mut sb = Superblock::load_or_format(&store).unwrap();
        let mut folder = fresh_folder(&store, &mut sb);
        let baseline = free_page_count(&store).unwrap();

        // 300 children: 106 inline + two overflow pages.
        let ids: Vec<u16> = (1000..1300).collect();
        for &id in &ids {
            add_child(&store, &mut sb, &mut folder, id).unwrap();
        }
        assert_ne!(folder.next, 0);
        assert_eq!(free_page_count(&store).unwrap(), baseline - 2);

        let mut listed = child_ids(&store, &folder).unwrap();
        listed.sort_unstable();
        assert_eq!(listed, ids);

        for &id in &ids {
            assert!(remove_child(&store, &mut sb, &mut folder, id).unwrap());
        }
        assert_eq!(folder.next, 0);
        assert!(child_ids(&store, &folder).unwrap().is_empty());
        assert_eq!(free_page_count(&store).unwrap(), baseline);
    }

    #[test]
    fn test_remove_compacts_from_chain_tail() {
        let store = MemStore::new();
        let mut sb = Superblock::load_or_format(&store).unwrap();
        let mut folder = fresh_folder(&store, &mut sb);
        for id in 1..=(FOLDER_SLOTS as u16 + 1) {
            add_child(&store, &mut sb, &mut folder, id + 2000).unwrap();
        }
        // Removing an inline entry pulls the single overflow entry back
        // inline and frees the now-empty overflow page.
        assert!(remove_child(&store, &mut sb, &mut folder, 2001).unwrap());
        assert_eq!(folder.next, 0);
        assert_eq!(child_ids(&store, &folder).unwrap().len(), FOLDER_SLOTS);
        assert!(folder.children.contains(&(FOLDER_SLOTS as u16 + 1 + 2000)));
    }

    #[test]
    fn test_remove_absent_child() {
        let store = MemStore::new();
        let mut sb = Superblock::load_or_format(&store).unwrap();
        let mut folder = fresh_folder(&store, &mut sb);
        add_child(&store, &mut sb, &mut folder, 2000).unwrap();
        assert!(!remove_child(&store, &mut sb, &mut folder, 9999).unwrap());
        assert_eq!(child_ids(&store, &folder).unwrap(), vec![2000]);
    }
}
