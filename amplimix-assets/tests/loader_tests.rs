use amplimix_assets::loader::AssetLoader;
use amplimix_assets::pkg::{Compression, PackageWriter};
use std::fs::File;
use std::io::Write;
use tempfile::tempdir;

fn make_sfx_bytes(frames: u64, channels: u16, sample_rate: u32) -> Vec<u8> {
    let mut v = Vec::new();
    v.extend_from_slice(b"SFX1");
    v.push(0u8); // f32
    v.push(channels as u8);
    v.extend_from_slice(&0u16.to_le_bytes());
    v.extend_from_slice(&sample_rate.to_le_bytes());
    v.extend_from_slice(&frames.to_le_bytes());
    for _ in 0..(frames * channels as u64) {
        v.extend_from_slice(&0f32.to_le_bytes());
    }
    v
}

#[test]
fn loader_reads_sfx_through_a_real_package() {
    let dir = tempdir().unwrap();
    let pkg_path = dir.path().join("p.pkg");

    let mut writer = PackageWriter::new(Compression::None);
    writer.add_item("kick.sfx", make_sfx_bytes(2, 2, 48_000));
    writer.write_file(&pkg_path).unwrap();

    let loader = AssetLoader::from_pkg_default(&pkg_path).unwrap();
    assert_eq!(loader.list_names().unwrap(), vec!["kick.sfx".to_string()]);

    let blob = loader.load_sfx_sync("kick.sfx").unwrap();
    assert_eq!(blob.channels, 2);
    assert_eq!(blob.frames, 2);

    // Second load hits the cache and returns the same data.
    let blob2 = loader.load_sfx_sync("kick.sfx").unwrap();
    assert_eq!(blob.samples, blob2.samples);
}

#[test]
fn from_pkg_rejects_a_non_package_file() {
    let dir = tempdir().unwrap();
    let pkg_path = dir.path().join("p2.pkg");
    let mut f = File::create(&pkg_path).unwrap();
    f.write_all(&make_sfx_bytes(2, 2, 48_000)).unwrap();
    assert!(AssetLoader::from_pkg_default(&pkg_path).is_err());
}

#[test]
fn loader_prefetch_spawns_thread() {
    let dir = tempdir().unwrap();
    let pkg_path = dir.path().join("no.pkg");
    let loader = AssetLoader::from_pkg_default(&pkg_path);
    assert!(loader.is_err());
}
