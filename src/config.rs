//! Volume geometry and record capacities. All of these are part of the
//! on-disk contract and must not change between versions.

/// Size of a single page, the sole unit of I/O and allocation.
pub const PAGE_SIZE: usize = 256;
/// Number of addressable pages (16-bit page ids, 16 MiB total).
pub const NUM_PAGES: usize = 65536;

/// Page id of the volume superblock.
pub const SUPERBLOCK_ID: u16 = 0;
/// First page of the free-space bitmap.
pub const BITMAP_START: u16 = 1;
/// The bitmap spans pages 1..=32: 32 pages x 2048 bits = 65536 bits.
pub const BITMAP_PAGES: u16 = 32;
/// Lowest page id handed out by the allocator on a fresh volume.
pub const FIRST_DATA_PAGE: u16 = 33;

/// Pages per quick-skip sub-region (one bitmap page's worth of bits).
pub const SUBREGION_PAGES: u32 = 2048;
/// Pages per quick-skip region (8 sub-regions, one index byte each).
pub const REGION_PAGES: u32 = 16384;
/// Number of quick-skip regions covering the whole address space.
pub const NUM_REGIONS: usize = 4;

// Page type tags (byte 0 of every page).
pub const TAG_FREE: u8 = 0;
pub const TAG_SUPERBLOCK: u8 = 1;
pub const TAG_FOLDER: u8 = 2;
pub const TAG_CHILD_LIST: u8 = 3;
pub const TAG_FILE: u8 = 4;
pub const TAG_CONTENT: u8 = 5;

/// Maximum length of a folder or file name, in bytes.
pub const MAX_NAME_LEN: usize = 32;
/// Inline child-id slots in a folder page.
pub const FOLDER_SLOTS: usize = 106;
/// Child-id slots in a directory-overflow page.
pub const CHILD_LIST_SLOTS: usize = 126;
/// Inline content bytes in a file page.
pub const FILE_INLINE_LEN: usize = 208;
/// Content bytes in a file-content-overflow page.
pub const CONTENT_LEN: usize = 249;

/// Fixed number of user slots in the superblock.
pub const NUM_USERS: usize = 7;
/// Maximum username length, in bytes.
pub const MAX_USERNAME_LEN: usize = 14;
/// Length of the stored password digest.
pub const DIGEST_LEN: usize = 16;
