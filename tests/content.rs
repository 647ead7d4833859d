#![allow(unused)]

use std::sync::Arc;

mod common;

use pagefs::{FsError, Folder, MemStore, Volume, FILE_INLINE_LEN};

fn session() -> (Volume<MemStore>, Folder) {
    let mut vol = Volume::mount(Arc::new(MemStore::new())).unwrap();
    vol.register("tester", "pw").unwrap();
    let root = vol.login("tester", "pw").unwrap();
    (vol, root)
}

fn pattern(n: usize) -> Vec<u8> {
    (0..n).map(|i| (i * 31 % 251) as u8).collect()
}

#[test]
fn test_roundtrip_across_chain_sizes() {
    let (mut vol, root) = session();
    let file = root.create_file(&mut vol, "data.bin").unwrap();
    // Zero, exactly inline, one past inline, and several overflow blocks.
    for n in [0usize, 1, 207, 208, 209, 457, 5000] {
        let data = pattern(n);
        file.write_bytes(&mut vol, &data).unwrap();
        assert_eq!(file.size(&vol).unwrap(), n as u64);
        assert_eq!(file.read_bytes(&vol).unwrap(), data, "size {n}");
    }
}

#[test]
fn test_text_roundtrip() {
    let (mut vol, root) = session();
    let file = root.create_file(&mut vol, "notes.txt").unwrap();
    let text = "zeile eins\nzeile zwei \u{1F980}\n".repeat(40);
    file.write_text(&mut vol, &text).unwrap();
    assert_eq!(file.read_text(&vol).unwrap(), text);
    file.append_text(&mut vol, "ende").unwrap();
    assert_eq!(file.read_text(&vol).unwrap(), format!("{text}ende"));
}

#[test]
fn test_append_composes_like_single_write() {
    let whole = pattern(3000);
    for split in [0usize, 100, FILE_INLINE_LEN, 300, 2999, 3000] {
        let (mut vol, root) = session();
        let a = root.create_file(&mut vol, "a").unwrap();
        a.write_bytes(&mut vol, &whole[..split]).unwrap();
        a.append_bytes(&mut vol, &whole[split..]).unwrap();

        let b = root.create_file(&mut vol, "b").unwrap();
        b.write_bytes(&mut vol, &whole).unwrap();

        assert_eq!(a.size(&vol).unwrap(), b.size(&vol).unwrap());
        assert_eq!(a.read_bytes(&vol).unwrap(), b.read_bytes(&vol).unwrap());
    }
}

#[test]
fn test_repeated_appends() {
    let (mut vol, root) = session();
    let file = root.create_file(&mut vol, "log").unwrap();
    let mut expect = Vec::new();
    for i in 0..50 {
        let chunk = pattern(97 + i);
        file.append_bytes(&mut vol, &chunk).unwrap();
        expect.extend_from_slice(&chunk);
    }
    assert_eq!(file.read_bytes(&vol).unwrap(), expect);
}

#[test]
fn test_shrinking_write_returns_pages() {
    let (mut vol, root) = session();
    let file = root.create_file(&mut vol, "waves").unwrap();
    let after_create = vol.free_pages().unwrap();
    file.write_bytes(&mut vol, &pattern(6000)).unwrap();
    assert!(vol.free_pages().unwrap() < after_create);
    file.write_bytes(&mut vol, &pattern(3)).unwrap();
    assert_eq!(vol.free_pages().unwrap(), after_create);
    assert_eq!(file.read_bytes(&vol).unwrap(), pattern(3));
}

#[test]
fn test_file_flags_gate_content_independently() {
    let (mut vol, root) = session();
    let file = root.create_file(&mut vol, "half.txt").unwrap();
    file.write_bytes(&mut vol, b"stable").unwrap();

    file.set_can_write(&vol, false).unwrap();
    assert_eq!(
        file.write_bytes(&mut vol, b"nope").unwrap_err(),
        FsError::PermissionDenied
    );
    assert_eq!(
        file.append_bytes(&mut vol, b"nope").unwrap_err(),
        FsError::PermissionDenied
    );
    assert_eq!(file.read_bytes(&vol).unwrap(), b"stable");

    file.set_can_write(&vol, true).unwrap();
    file.set_can_read(&vol, false).unwrap();
    assert_eq!(file.read_bytes(&vol).unwrap_err(), FsError::PermissionDenied);
    assert_eq!(file.read_text(&vol).unwrap_err(), FsError::PermissionDenied);
    file.append_bytes(&mut vol, b" again").unwrap();

    // Content access ignores the parent folder's flags entirely.
    root.set_can_read(&vol, false).unwrap();
    file.set_can_read(&vol, true).unwrap();
    assert_eq!(file.read_bytes(&vol).unwrap(), b"stable again");
}

#[test]
fn test_disk_full_write_rolls_back_allocations() {
    let (mut vol, root) = session();
    let file = root.create_file(&mut vol, "endless").unwrap();
    let before = vol.free_pages().unwrap();

    // 16 MiB cannot fit: the usable pages cap content capacity below it.
    log!("free pages before oversized write: {}", before);
    let too_big = vec![0x5Au8; 16 * 1024 * 1024];
    assert_eq!(
        file.write_bytes(&mut vol, &too_big).unwrap_err(),
        FsError::OutOfSpace
    );
    // Every page the failed write allocated is free again and the file
    // is still empty.
    assert_eq!(vol.free_pages().unwrap(), before);
    assert_eq!(file.size(&vol).unwrap(), 0);

    file.write_bytes(&mut vol, b"still works").unwrap();
    assert_eq!(file.read_bytes(&vol).unwrap(), b"still works");
}

#[test]
fn test_write_updates_mtime() {
    let (mut vol, root) = session();
    let file = root.create_file(&mut vol, "t").unwrap();
    assert!(file.modified(&vol).unwrap() > 0);
}
