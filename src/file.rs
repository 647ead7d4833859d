//! File records (tag 4) and their content-overflow pages (tag 5).
//!
//! A file keeps its first 208 content bytes inline; the rest lives in a
//! singly linked chain of overflow pages carrying 249 bytes each plus a
//! count of the bytes still remaining from that link onward.
//!
//! Chain rewrites are atomic units of allocator usage: on an allocation
//! failure every newly allocated page is freed again, so a failed write
//! never changes the net number of allocated pages. Bytes of pre-existing
//! chain pages already rewritten before the failure are not restored.

use crate::bitmap::{allocate, free_page};
use crate::config::*;
use crate::error::{FsError, Result};
use crate::folder::{decode_perm, encode_perm};
use crate::layout::{pack_name, read_i32, read_i64, read_u16, unix_now, unpack_name, write_i32, write_i64, write_u16};
use crate::store::PageStore;
use crate::superblock::Superblock;

/// In-memory view of a file page, materialized fresh per call like
/// [`FolderRecord`](crate::folder::FolderRecord).
#[derive(Debug, Clone)]
pub(crate) struct FileRecord {
    pub page: u16,
    pub name: String,
    pub mtime: i64,
    pub can_read: bool,
    pub can_write: bool,
    pub size: i32,
    pub content: [u8; FILE_INLINE_LEN],
    pub next: u16,
}

impl FileRecord {
    /// Decodes the page; a zero-tag page takes the load-or-init path
    /// (current time, read/write allowed, empty) and persists at once.
    pub fn load(device: &impl PageStore, page: u16) -> Result<FileRecord> {
        let mut buf = [0u8; PAGE_SIZE];
        device.read_page(page, &mut buf)?;
        match buf[0] {
            TAG_FILE => {
                let (can_read, can_write) = decode_perm(buf[41]);
                let mut content = [0u8; FILE_INLINE_LEN];
                content.copy_from_slice(&buf[46..254]);
                Ok(FileRecord {
                    page,
                    name: unpack_name(&buf[1..33]),
                    mtime: read_i64(&buf, 33),
                    can_read,
                    can_write,
                    size: read_i32(&buf, 42),
                    content,
                    next: read_u16(&buf, 254),
                })
            }
            TAG_FREE => {
                let rec = FileRecord {
                    page,
                    name: String::new(),
                    mtime: unix_now(),
                    can_read: true,
                    can_write: true,
                    size: 0,
                    content: [0; FILE_INLINE_LEN],
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
        buf[0] = TAG_FILE;
        pack_name(&mut buf[1..33], &self.name);
        write_i64(&mut buf, 33, self.mtime);
        buf[41] = encode_perm(self.can_read, self.can_write);
        write_i32(&mut buf, 42, self.size);
        buf[46..254].copy_from_slice(&self.content);
        write_u16(&mut buf, 254, self.next);
        device.write_page(self.page, &buf)
    }
}

/// One content-overflow page: bytes remaining from this link to the end
/// of the chain, up to 249 content bytes, and the next link.
#[derive(Debug, Clone)]
pub(crate) struct ContentRecord {
    pub page: u16,
    pub remaining: i32,
    pub content: [u8; CONTENT_LEN],
    pub next: u16,
}

impl ContentRecord {
    pub fn load(device: &impl PageStore, page: u16) -> Result<ContentRecord> {
        let mut buf = [0u8; PAGE_SIZE];
        device.read_page(page, &mut buf)?;
        if buf[0] != TAG_CONTENT && buf[0] != TAG_FREE {
            return Err(FsError::BadPageTag(page));
        }
        let mut content = [0u8; CONTENT_LEN];
        content.copy_from_slice(&buf[5..254]);
        Ok(ContentRecord {
            page,
            remaining: read_i32(&buf, 1),
            content,
            next: read_u16(&buf, 254),
        })
    }

    pub fn flush(&self, device: &impl PageStore) -> Result<()> {
        let mut buf = [0u8; PAGE_SIZE];
        buf[0] = TAG_CONTENT;
        write_i32(&mut buf, 1, self.remaining);
        buf[5..254].copy_from_slice(&self.content);
        write_u16(&mut buf, 254, self.next);
        device.write_page(self.page, &buf)
    }
}

/// Reads the file's full content. Truncation is driven by the head's
/// total size, so the result is exactly `size` bytes.
pub(crate) fn read_all(device: &impl PageStore, file: &FileRecord) -> Result<Vec<u8>> {
    let size = file.size.max(0) as usize;
    let mut out = Vec::with_capacity(size);
    let take = size.min(FILE_INLINE_LEN);
    out.extend_from_slice(&file.content[..take]);
    let mut remaining = size - take;
    let mut next = file.next;
    while remaining > 0 {
        if next == 0 {
            return Err(FsError::CorruptChain);
        }
        let rec = ContentRecord::load(device, next)?;
        let take = remaining.min(CONTENT_LEN);
        out.extend_from_slice(&rec.content[..take]);
        remaining -= take;
        next = rec.next;
    }
    Ok(out)
}

/// Rewrites a content chain starting at `head` (0 to build a new chain)
/// so it holds exactly `data`, allocating onward links as needed and
/// freeing any surplus tail. On allocation failure every page allocated
/// by this call is freed before the error propagates.
fn chain_write(
    device: &impl PageStore,
    sb: &mut Superblock,
    head: u16,
    data: &[u8],
) -> Result<u16> {
    debug_assert!(!data.is_empty());
    let mut new_pages = Vec::new();
    let head = if head != 0 {
        head
    } else {
        match allocate(device, sb)? {
            Some(id) => {
                new_pages.push(id);
                id
            }
            None => return Err(FsError::OutOfSpace),
        }
    };

    let mut cur = head;
    let mut off = 0usize;
    loop {
        let mut rec = ContentRecord::load(device, cur)?;
        rec.remaining = (data.len() - off) as i32;
        let take = (data.len() - off).min(CONTENT_LEN);
        rec.content.fill(0);
        rec.content[..take].copy_from_slice(&data[off..off + take]);
        off += take;

        if off == data.len() {
            if rec.next != 0 {
                free_chain(device, sb, rec.next)?;
                rec.next = 0;
            }
            rec.flush(device)?;
            return Ok(head);
        }
        if rec.next == 0 {
            match allocate(device, sb)? {
                Some(id) => {
                    rec.next = id;
                    new_pages.push(id);
                }
                None => {
                    for id in new_pages {
                        free_page(device, sb, id)?;
                    }
                    return Err(FsError::OutOfSpace);
                }
            }
        }
        rec.flush(device)?;
        cur = rec.next;
    }
}

/// Replaces the file's content with `data` and sets its size. The whole
/// persisted chain reflects the new content, or — on allocation failure —
/// no net pages stay allocated and the head page is untouched.
pub(crate) fn write_all(
    device: &impl PageStore,
    sb: &mut Superblock,
    file: &mut FileRecord,
    data: &[u8],
) -> Result<()> {
    if data.len() <= FILE_INLINE_LEN {
        file.content.fill(0);
        file.content[..data.len()].copy_from_slice(data);
        if file.next != 0 {
            free_chain(device, sb, file.next)?;
            file.next = 0;
        }
    } else {
        file.next = chain_write(device, sb, file.next, &data[FILE_INLINE_LEN..])?;
        file.content.copy_from_slice(&data[..FILE_INLINE_LEN]);
    }
    file.size = data.len() as i32;
    file.mtime = unix_now();
    file.flush(device)
}

/// Appends `data` to the file: tops up the inline area or the chain's
/// last link first, then falls into the chain-filling rewrite for the
/// remainder. Same allocator-rollback contract as [`write_all`].
pub(crate) fn append_all(
    device: &impl PageStore,
    sb: &mut Superblock,
    file: &mut FileRecord,
    data: &[u8],
) -> Result<()> {
    if data.is_empty() {
        return Ok(());
    }
    let size = file.size.max(0) as usize;

    if size + data.len() <= FILE_INLINE_LEN {
        file.content[size..size + data.len()].copy_from_slice(data);
    } else if size <= FILE_INLINE_LEN {
        let fill = FILE_INLINE_LEN - size;
        debug_assert_eq!(file.next, 0);
        file.next = chain_write(device, sb, 0, &data[fill..])?;
        file.content[size..].copy_from_slice(&data[..fill]);
    } else {
        // Walk to the last link, then rewrite from there with its old
        // bytes plus the new data. Links passed on the way get their
        // remaining counters bumped once the rewrite has succeeded.
        let mut walked = Vec::new();
        let mut cur = file.next;
        loop {
            if cur == 0 {
                return Err(FsError::CorruptChain);
            }
            let rec = ContentRecord::load(device, cur)?;
            let remaining = rec.remaining.max(0) as usize;
            if remaining <= CONTENT_LEN {
                let mut tail = Vec::with_capacity(remaining + data.len());
                tail.extend_from_slice(&rec.content[..remaining]);
                tail.extend_from_slice(data);
                chain_write(device, sb, cur, &tail)?;
                break;
            }
            walked.push(cur);
            cur = rec.next;
        }
        for id in walked {
            let mut rec = ContentRecord::load(device, id)?;
            rec.remaining += data.len() as i32;
            rec.flush(device)?;
        }
    }

    file.size += data.len() as i32;
    file.mtime = unix_now();
    file.flush(device)
}

/// Frees a content chain starting at `head`.
pub(crate) fn free_chain(device: &impl PageStore, sb: &mut Superblock, head: u16) -> Result<()> {
    let mut next = head;
    while next != 0 {
        let rec = ContentRecord::load(device, next)?;
        free_page(device, sb, next)?;
        next = rec.next;
    }
    Ok(())
}

/// Frees a file and its whole content chain.
pub(crate) fn free_file(device: &impl PageStore, sb: &mut Superblock, page: u16) -> Result<()> {
    let file = FileRecord::load(device, page)?;
    free_chain(device, sb, file.next)?;
    free_page(device, sb, page)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bitmap::free_page_count;
    use crate::store::MemStore;

    fn fresh_file(device: &MemStore, sb: &mut Superblock) -> FileRecord {
        let page = allocate(device, sb).unwrap().unwrap();
        FileRecord::load(device, page).unwrap()
    }

    fn pattern(n: usize) -> Vec<u8> {
        (0..n).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_write_read_spanning_chain() {
        let store = MemStore::new();
        let mut sb = Superblock::load_or_format(&store).unwrap();
        let mut file = fresh_file(&store, &mut sb);
        for n in [0usize, 1, 208, 209, 457, 5000] {
            let data = pattern(n);
            write_all(&store, &mut sb, &mut file, &data).unwrap();
            assert_eq!(file.size as usize, n);
            assert_eq!(read_all(&store, &file).unwrap(), data);
        }
    }

    #[test]
    fn test_shrinking_write_frees_surplus_chain() {
        let store = MemStore::new();
        let mut sb = Superblock::load_or_format(&store).unwrap();
        let mut file = fresh_file(&store, &mut sb);
        let baseline = free_page_count(&store).unwrap();
        write_all(&store, &mut sb, &mut file, &pattern(5000)).unwrap();
        assert!(free_page_count(&store).unwrap() < baseline);
        write_all(&store, &mut sb, &mut file, &pattern(10)).unwrap();
        assert_eq!(file.next, 0);
        assert_eq!(free_page_count(&store).unwrap(), baseline);
        assert_eq!(read_all(&store, &file).unwrap(), pattern(10));
    }

    #[test]
    fn test_append_matches_single_write() {
        let store = MemStore::new();
        let mut sb = Superblock::load_or_format(&store).unwrap();
        let whole = pattern(3000);
        for split in [0usize, 100, 208, 300, 2999] {
            let mut file = fresh_file(&store, &mut sb);
            write_all(&store, &mut sb, &mut file, &whole[..split]).unwrap();
            append_all(&store, &mut sb, &mut file, &whole[split..]).unwrap();
            assert_eq!(file.size as usize, whole.len());
            assert_eq!(read_all(&store, &file).unwrap(), whole);
            free_file(&store, &mut sb, file.page).unwrap();
        }
    }

    #[test]
    fn test_remaining_counters_stay_consistent() {
        let store = MemStore::new();
        let mut sb = Superblock::load_or_format(&store).unwrap();
        let mut file = fresh_file(&store, &mut sb);
        write_all(&store, &mut sb, &mut file, &pattern(1000)).unwrap();
        append_all(&store, &mut sb, &mut file, &pattern(600)).unwrap();
        let mut expect = (file.size as usize) - FILE_INLINE_LEN;
        let mut next = file.next;
        while next != 0 {
            let rec = ContentRecord::load(&store, next).unwrap();
            assert_eq!(rec.remaining as usize, expect);
            expect = expect.saturating_sub(CONTENT_LEN);
            next = rec.next;
        }
        assert_eq!(expect, 0);
    }

    #[test]
    fn test_free_file_releases_chain() {
        let store = MemStore::new();
        let mut sb = Superblock::load_or_format(&store).unwrap();
        let baseline = free_page_count(&store).unwrap();
        let mut file = fresh_file(&store, &mut sb);
        write_all(&store, &mut sb, &mut file, &pattern(5000)).unwrap();
        free_file(&store, &mut sb, file.page).unwrap();
        assert_eq!(free_page_count(&store).unwrap(), baseline);
    }
}
