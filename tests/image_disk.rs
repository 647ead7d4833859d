#![allow(unused)]

mod common;

use std::path::PathBuf;
use std::sync::Arc;

use pagefs::*;

fn image_path(name: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!("pagefs-{name}-{}.img", std::process::id()));
    path
}

#[test]
fn test_image_survives_remount() {
    let path = image_path("remount");
    let _ = std::fs::remove_file(&path);

    {
        let store = Arc::new(FileStore::open(&path).unwrap());
        let mut vol = Volume::mount(store).unwrap();
        vol.register("keeper", "hunter2").unwrap();
        let root = vol.login("keeper", "hunter2").unwrap();

        let docs = root.create_folder(&mut vol, "docs").unwrap();
        let file = docs.create_file(&mut vol, "manifest.txt").unwrap();
        file.write_text(&mut vol, "carried across remounts\n").unwrap();
        let blob = root.create_file(&mut vol, "blob").unwrap();
        blob.write_bytes(&mut vol, &vec![0xABu8; 3000]).unwrap();

        vol.close().unwrap();
    }

    {
        let store = Arc::new(FileStore::open(&path).unwrap());
        let mut vol = Volume::mount(store).unwrap();
        let root = vol.login("keeper", "hunter2").unwrap();

        let docs = root.get_folder(&vol, "docs").unwrap();
        let file = docs.get_file(&vol, "manifest.txt").unwrap();
        assert_eq!(file.read_text(&vol).unwrap(), "carried across remounts\n");
        assert_eq!(file.path(&vol).unwrap(), "/docs/manifest.txt");

        let blob = root.get_file(&vol, "blob").unwrap();
        assert_eq!(blob.read_bytes(&vol).unwrap(), vec![0xABu8; 3000]);

        assert_eq!(
            vol.login("keeper", "wrong").unwrap_err(),
            FsError::BadCredentials
        );
    }

    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_unloaded_store_reports_unavailable() {
    let path = image_path("unload");
    let _ = std::fs::remove_file(&path);

    let store = Arc::new(FileStore::open(&path).unwrap());
    let mut vol = Volume::mount(Arc::clone(&store)).unwrap();
    vol.register("keeper", "pw").unwrap();
    vol.close().unwrap();

    assert!(!store.is_loaded());
    let mut buf = [0u8; PAGE_SIZE];
    assert_eq!(
        store.read_page(0, &mut buf).unwrap_err(),
        FsError::DeviceUnavailable
    );

    let _ = std::fs::remove_file(&path);
}
