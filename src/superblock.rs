//! The volume superblock (page 0): format version, the allocator's
//! first-free hint and quick-skip index, and the fixed table of seven
//! user slots.

use log::debug;

use crate::config::*;
use crate::error::Result;
use crate::layout::{pack_name, read_u16, unpack_name, write_u16};
use crate::store::PageStore;

/// One 32-byte user slot: username (14 bytes, null-padded), password
/// digest (16 bytes), root folder page id. A slot is in use iff its root
/// id is non-zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct UserSlot {
    pub name: String,
    pub digest: [u8; DIGEST_LEN],
    pub root: u16,
}

impl UserSlot {
    const EMPTY: UserSlot = UserSlot {
        name: String::new(),
        digest: [0; DIGEST_LEN],
        root: 0,
    };

    pub fn in_use(&self) -> bool {
        self.root != 0
    }

    pub fn clear(&mut self) {
        *self = Self::EMPTY;
    }

    fn decode(field: &[u8]) -> UserSlot {
        let mut digest = [0u8; DIGEST_LEN];
        digest.copy_from_slice(&field[MAX_USERNAME_LEN..MAX_USERNAME_LEN + DIGEST_LEN]);
        UserSlot {
            name: unpack_name(&field[..MAX_USERNAME_LEN]),
            digest,
            root: read_u16(field, 30),
        }
    }

    fn encode(&self, field: &mut [u8]) {
        pack_name(&mut field[..MAX_USERNAME_LEN], &self.name);
        field[MAX_USERNAME_LEN..MAX_USERNAME_LEN + DIGEST_LEN].copy_from_slice(&self.digest);
        write_u16(field, 30, self.root);
    }
}

/// In-memory mirror of page 0. The authoritative copy is on disk; every
/// mutation is followed by [`Superblock::flush`].
#[derive(Debug, Clone)]
pub struct Superblock {
    pub version: u8,
    /// Lowest known free page id; 0 means no known free page.
    pub(crate) first_free: u16,
    /// One byte per 16384-page region; each bit marks a 2048-page
    /// sub-region as provably fully allocated.
    pub(crate) quick_skip: [u8; NUM_REGIONS],
    pub(crate) users: [UserSlot; NUM_USERS],
}

impl Superblock {
    /// Reads page 0 and decodes it; an unformatted page (tag 0) formats
    /// the volume in place, reserving page 0 and the 32 bitmap pages.
    pub(crate) fn load_or_format(device: &impl PageStore) -> Result<Superblock> {
        let mut buf = [0u8; PAGE_SIZE];
        device.read_page(SUPERBLOCK_ID, &mut buf)?;

        if buf[0] != TAG_SUPERBLOCK {
            let sb = Superblock {
                version: 1,
                first_free: FIRST_DATA_PAGE,
                quick_skip: [0; NUM_REGIONS],
                users: [const { UserSlot::EMPTY }; NUM_USERS],
            };
            sb.format_bitmap(device)?;
            sb.flush(device)?;
            debug!("formatted fresh volume, first free page {}", sb.first_free);
            return Ok(sb);
        }

        let mut users = [const { UserSlot::EMPTY }; NUM_USERS];
        for (i, slot) in users.iter_mut().enumerate() {
            let at = (i + 1) * 32;
            *slot = UserSlot::decode(&buf[at..at + 32]);
        }
        let mut quick_skip = [0u8; NUM_REGIONS];
        quick_skip.copy_from_slice(&buf[4..8]);
        Ok(Superblock {
            version: buf[1],
            first_free: read_u16(&buf, 2),
            quick_skip,
            users,
        })
    }

    /// Writes a fresh bitmap with pages 0..=32 (superblock plus the
    /// bitmap itself) pre-marked allocated and everything else free.
    fn format_bitmap(&self, device: &impl PageStore) -> Result<()> {
        let zero = [0u8; PAGE_SIZE];
        for i in 1..BITMAP_PAGES {
            device.write_page(BITMAP_START + i, &zero)?;
        }
        let mut first = [0u8; PAGE_SIZE];
        first[..4].fill(0xFF); // pages 0..=31
        first[4] = 0x01; // page 32, the last bitmap page
        device.write_page(BITMAP_START, &first)?;
        Ok(())
    }

    /// Persists the in-memory state back to page 0.
    pub(crate) fn flush(&self, device: &impl PageStore) -> Result<()> {
        let mut buf = [0u8; PAGE_SIZE];
        buf[0] = TAG_SUPERBLOCK;
        buf[1] = self.version;
        write_u16(&mut buf, 2, self.first_free);
        buf[4..8].copy_from_slice(&self.quick_skip);
        for (i, slot) in self.users.iter().enumerate() {
            let at = (i + 1) * 32;
            slot.encode(&mut buf[at..at + 32]);
        }
        device.write_page(SUPERBLOCK_ID, &buf)?;
        Ok(())
    }

    pub(crate) fn find_user(&self, name: &str) -> Option<usize> {
        self.users
            .iter()
            .position(|u| u.in_use() && u.name == name)
    }

    pub(crate) fn free_slot(&mut self) -> Option<usize> {
        self.users.iter().position(|u| !u.in_use())
    }
}

/// The digest stored in a user slot. Unsalted; the slot's 16-byte
/// field is part of the on-disk format.
pub(crate) fn password_digest(password: &str) -> [u8; DIGEST_LEN] {
    md5::compute(password.as_bytes()).0
}
