//! Free-space management: one bit per page id across bitmap pages 1..=32,
//! summarized by the superblock's quick-skip index so a densely packed
//! volume is scanned region-by-region instead of bit-by-bit.
//!
//! Allocation policy is greedy lowest-free-id: the superblock keeps a
//! "first known free page" hint, advanced on allocate and pulled back by
//! any free below it. A hint of 0 means the address space is exhausted.

use log::trace;

use crate::config::*;
use crate::error::Result;
use crate::store::PageStore;
use crate::superblock::Superblock;

fn bitmap_page_of(id: u16) -> u16 {
    BITMAP_START + (id as u32 / SUBREGION_PAGES) as u16
}

/// Whether `id`'s bitmap bit is set.
pub(crate) fn page_used(device: &impl PageStore, id: u16) -> Result<bool> {
    let mut buf = [0u8; PAGE_SIZE];
    device.read_page(bitmap_page_of(id), &mut buf)?;
    let byte = (id as u32 % SUBREGION_PAGES / 8) as usize;
    Ok(buf[byte] & (1 << (id % 8)) != 0)
}

/// Claims the hinted page: zeroes it on disk, sets its bitmap bit, and
/// advances the hint to the next free id. Returns `None` when the hint is
/// the exhaustion sentinel; running out of pages is an expected condition,
/// not a fault.
pub(crate) fn allocate(device: &impl PageStore, sb: &mut Superblock) -> Result<Option<u16>> {
    let id = sb.first_free;
    if id == 0 {
        return Ok(None);
    }

    device.write_page(id, &[0u8; PAGE_SIZE])?;

    let mut buf = [0u8; PAGE_SIZE];
    let map_id = bitmap_page_of(id);
    device.read_page(map_id, &mut buf)?;
    let byte = (id as u32 % SUBREGION_PAGES / 8) as usize;
    buf[byte] |= 1 << (id % 8);
    device.write_page(map_id, &buf)?;

    // The quick-skip flag is raised the moment the sub-region's last
    // free bit is consumed, never lazily during a later scan.
    if buf.iter().all(|&b| b == 0xFF) {
        let region = (id as u32 / REGION_PAGES) as usize;
        let sub = id as u32 / SUBREGION_PAGES % 8;
        sb.quick_skip[region] |= 1 << sub;
    }

    sb.first_free = next_free(device, sb, id as u32 + 1)?.unwrap_or(0);
    sb.flush(device)?;
    trace!("allocated page {id}, next hint {}", sb.first_free);
    Ok(Some(id))
}

/// Returns `id` to the free set. Freeing an already-free page is a no-op,
/// which lets subtree teardown stay simple. A free below the current hint
/// pulls the hint down to it.
pub(crate) fn free_page(device: &impl PageStore, sb: &mut Superblock, id: u16) -> Result<()> {
    let mut buf = [0u8; PAGE_SIZE];
    let map_id = bitmap_page_of(id);
    device.read_page(map_id, &mut buf)?;
    let byte = (id as u32 % SUBREGION_PAGES / 8) as usize;
    let bit = 1 << (id % 8);
    if buf[byte] & bit == 0 {
        return Ok(());
    }
    buf[byte] &= !bit;
    device.write_page(map_id, &buf)?;

    let region = (id as u32 / REGION_PAGES) as usize;
    let sub = id as u32 / SUBREGION_PAGES % 8;
    sb.quick_skip[region] &= !(1u8 << sub);

    if sb.first_free == 0 || id < sb.first_free {
        sb.first_free = id;
    }
    sb.flush(device)?;
    trace!("freed page {id}, hint {}", sb.first_free);
    Ok(())
}

/// Finds the lowest free page id at or above `from`, narrowing in order:
/// whole 16384-page regions, 2048-page sub-regions, bitmap bytes, then
/// single bits. Fully-allocated stretches are skipped via the quick-skip
/// index without touching their bitmap pages.
fn next_free(device: &impl PageStore, sb: &Superblock, from: u32) -> Result<Option<u16>> {
    let mut from = from;
    while from < NUM_PAGES as u32 {
        let region = (from / REGION_PAGES) as usize;
        if sb.quick_skip[region] == 0xFF {
            from = (region as u32 + 1) * REGION_PAGES;
            continue;
        }
        let sub = from / SUBREGION_PAGES % 8;
        if sb.quick_skip[region] & (1 << sub) != 0 {
            from = (from / SUBREGION_PAGES + 1) * SUBREGION_PAGES;
            continue;
        }

        let sub_base = from / SUBREGION_PAGES * SUBREGION_PAGES;
        let mut buf = [0u8; PAGE_SIZE];
        device.read_page(BITMAP_START + (from / SUBREGION_PAGES) as u16, &mut buf)?;
        let mut byte = ((from - sub_base) / 8) as usize;
        let mut bit = from % 8;
        while byte < PAGE_SIZE {
            if buf[byte] != 0xFF {
                for k in bit..8 {
                    if buf[byte] & (1 << k) == 0 {
                        return Ok(Some((sub_base + byte as u32 * 8 + k) as u16));
                    }
                }
            }
            byte += 1;
            bit = 0;
        }
        from = sub_base + SUBREGION_PAGES;
    }
    Ok(None)
}

/// Number of pages currently free on the volume, counted from the bitmap.
pub(crate) fn free_page_count(device: &impl PageStore) -> Result<u32> {
    let mut free = 0u32;
    let mut buf = [0u8; PAGE_SIZE];
    for i in 0..BITMAP_PAGES {
        device.read_page(BITMAP_START + i, &mut buf)?;
        free += buf.iter().map(|b| b.count_zeros()).sum::<u32>();
    }
    Ok(free)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::store::MemStore;

    #[test]
    fn test_sequential_allocation() {
        let store = MemStore::new();
        let mut sb = Superblock::load_or_format(&store).unwrap();
        assert_eq!(allocate(&store, &mut sb).unwrap(), Some(33));
        assert_eq!(allocate(&store, &mut sb).unwrap(), Some(34));
        assert_eq!(allocate(&store, &mut sb).unwrap(), Some(35));
        assert!(page_used(&store, 34).unwrap());
    }

    #[test]
    fn test_free_lowers_hint() {
        let store = MemStore::new();
        let mut sb = Superblock::load_or_format(&store).unwrap();
        for _ in 0..8 {
            allocate(&store, &mut sb).unwrap();
        }
        free_page(&store, &mut sb, 35).unwrap();
        assert_eq!(sb.first_free, 35);
        assert_eq!(allocate(&store, &mut sb).unwrap(), Some(35));
        // Hint moves back past the already-allocated run.
        assert_eq!(allocate(&store, &mut sb).unwrap(), Some(41));
    }

    #[test]
    fn test_double_free_is_noop() {
        let store = MemStore::new();
        let mut sb = Superblock::load_or_format(&store).unwrap();
        let id = allocate(&store, &mut sb).unwrap().unwrap();
        let free_before = free_page_count(&store).unwrap();
        free_page(&store, &mut sb, id).unwrap();
        free_page(&store, &mut sb, id).unwrap();
        assert_eq!(free_page_count(&store).unwrap(), free_before + 1);
    }

    #[test]
    fn test_exhaustion_and_recovery() {
        let store = MemStore::new();
        let mut sb = Superblock::load_or_format(&store).unwrap();
        while allocate(&store, &mut sb).unwrap().is_some() {}
        assert_eq!(sb.first_free, 0);
        assert_eq!(free_page_count(&store).unwrap(), 0);
        // One free page means exactly one more allocation, of that id.
        free_page(&store, &mut sb, 12345).unwrap();
        assert_eq!(allocate(&store, &mut sb).unwrap(), Some(12345));
        assert_eq!(allocate(&store, &mut sb).unwrap(), None);
    }

    #[test]
    fn test_quick_skip_set_on_full_subregion() {
        let store = MemStore::new();
        let mut sb = Superblock::load_or_format(&store).unwrap();
        // Pages 0..=32 are reserved; consuming 33..=2047 fills sub-region 0.
        for expect in 33..2048u16 {
            assert_eq!(allocate(&store, &mut sb).unwrap(), Some(expect));
        }
        assert_eq!(sb.quick_skip[0] & 1, 1);
        assert_eq!(sb.first_free, 2048);
        // Freeing inside the sub-region clears the flag again.
        free_page(&store, &mut sb, 100).unwrap();
        assert_eq!(sb.quick_skip[0] & 1, 0);
        assert_eq!(allocate(&store, &mut sb).unwrap(), Some(100));
        assert_eq!(sb.first_free, 2048);
    }
}
