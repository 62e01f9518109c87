//! End-to-end create/extract scenarios.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::tempdir;

use goxa::codec::Codec;
use goxa::config::ArchiveConfig;
use goxa::create;
use goxa::digest::Digest;
use goxa::extract;
use goxa::flags::{
    BitFlags, F_CHECKSUMS, F_INCLUDE_HIDDEN, F_MOD_TIMES, F_NO_COMPRESS, F_PERMISSIONS,
    F_SPECIAL_FILES,
};
use goxa::progress::Snapshot;

const NO_RENDER: Option<fn(Snapshot)> = None;

struct FileSpec {
    rel: &'static str,
    data: &'static [u8],
    mode: u32,
}

const TREE: &[FileSpec] = &[
    FileSpec { rel: "dir1/file1.txt", data: b"file1", mode: 0o754 },
    FileSpec { rel: "dir1/.hidden", data: b"hidden1", mode: 0o600 },
    FileSpec { rel: "dir2/file2.txt", data: b"file2", mode: 0o640 },
    FileSpec { rel: ".hiddendir/hfile.txt", data: b"hidden2", mode: 0o600 },
    FileSpec { rel: "rootfile.txt", data: b"root", mode: 0o664 },
];

fn setup_tree(root: &Path) {
    for spec in TREE {
        let full = root.join(spec.rel);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(&full, spec.data).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&full, fs::Permissions::from_mode(spec.mode)).unwrap();
        }
    }
}

fn base_config() -> ArchiveConfig {
    let mut config = ArchiveConfig::default();
    config.space_check = false;
    config
}

fn round_trip(config: &ArchiveConfig, tmp: &Path) -> PathBuf {
    let root = tmp.join("root");
    setup_tree(&root);
    let archive = tmp.join("test.goxa");
    create::create(config, &[root], &archive, NO_RENDER).unwrap();

    let dest = tmp.join("out");
    extract::extract(config, &archive, &dest, &[], NO_RENDER).unwrap();
    dest.join("root")
}

#[test]
fn default_flags_skip_hidden_and_normalize_modes() {
    let tmp = tempdir().unwrap();
    let mut config = base_config();
    config.features = BitFlags::default();
    let out = round_trip(&config, tmp.path());

    assert_eq!(fs::read(out.join("dir1/file1.txt")).unwrap(), b"file1");
    assert_eq!(fs::read(out.join("dir2/file2.txt")).unwrap(), b"file2");
    assert_eq!(fs::read(out.join("rootfile.txt")).unwrap(), b"root");
    assert!(!out.join("dir1/.hidden").exists());
    assert!(!out.join(".hiddendir").exists());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(out.join("dir1/file1.txt"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o644);
    }
}

#[test]
fn all_flags_preserve_everything() {
    let tmp = tempdir().unwrap();
    let mut config = base_config();
    config.features =
        F_PERMISSIONS | F_MOD_TIMES | F_CHECKSUMS | F_INCLUDE_HIDDEN | F_NO_COMPRESS;
    let root = tmp.path().join("root");
    setup_tree(&root);

    let archive = tmp.path().join("test.goxa");
    let summary = create::create(&config, &[root.clone()], &archive, NO_RENDER).unwrap();
    assert_eq!(summary.files, TREE.len());

    let dest = tmp.path().join("out");
    let result = extract::extract(&config, &archive, &dest, &[], NO_RENDER).unwrap();
    assert_eq!(result.files_extracted, TREE.len() as u64);
    assert_eq!(result.checksums_verified, TREE.len() as u64);

    for spec in TREE {
        let original = root.join(spec.rel);
        let extracted = dest.join("root").join(spec.rel);
        assert_eq!(fs::read(&extracted).unwrap(), spec.data);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&extracted).unwrap().permissions().mode();
            assert_eq!(mode & 0o7777, spec.mode, "{}", spec.rel);
        }
        let want = fs::metadata(&original).unwrap().modified().unwrap();
        let got = fs::metadata(&extracted).unwrap().modified().unwrap();
        let delta = want
            .duration_since(got)
            .unwrap_or_else(|e| e.duration())
            .as_secs();
        assert!(delta <= 1, "mtime drift for {}", spec.rel);
    }
}

#[cfg(unix)]
#[test]
fn symlink_target_round_trips() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("root");
    fs::create_dir_all(&root).unwrap();
    fs::write(root.join("file.txt"), b"contents").unwrap();
    std::os::unix::fs::symlink("file.txt", root.join("link.txt")).unwrap();

    let mut config = base_config();
    config.features.set(F_SPECIAL_FILES);
    let archive = tmp.path().join("test.goxa");
    create::create(&config, &[root], &archive, NO_RENDER).unwrap();

    let dest = tmp.path().join("out");
    extract::extract(&config, &archive, &dest, &[], NO_RENDER).unwrap();

    let link = dest.join("root/link.txt");
    let md = fs::symlink_metadata(&link).unwrap();
    assert!(md.file_type().is_symlink());
    assert_eq!(fs::read_link(&link).unwrap(), PathBuf::from("file.txt"));
}

#[test]
fn every_codec_round_trips() {
    for codec in [
        Codec::Gzip,
        Codec::Zstd,
        Codec::Lz4,
        Codec::Snappy,
        Codec::Brotli,
        Codec::Xz,
    ] {
        let tmp = tempdir().unwrap();
        let mut config = base_config();
        config.codec = codec;
        let out = round_trip(&config, tmp.path());
        assert_eq!(
            fs::read(out.join("dir1/file1.txt")).unwrap(),
            b"file1",
            "codec {}",
            codec.name()
        );
    }
}

#[test]
fn every_digest_round_trips() {
    for digest in [
        Digest::Crc32,
        Digest::Crc16,
        Digest::Xxh3,
        Digest::Sha256,
        Digest::Blake3,
    ] {
        let tmp = tempdir().unwrap();
        let mut config = base_config();
        config.digest = digest;
        config.digest_len = 8;
        let root = tmp.path().join("root");
        setup_tree(&root);
        let archive = tmp.path().join("test.goxa");
        create::create(&config, &[root], &archive, NO_RENDER).unwrap();

        let dest = tmp.path().join("out");
        let result = extract::extract(&config, &archive, &dest, &[], NO_RENDER).unwrap();
        assert_eq!(
            result.checksums_verified,
            result.files_extracted,
            "digest {}",
            digest.name()
        );
    }
}

#[test]
fn archive_creation_is_deterministic() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("root");
    setup_tree(&root);

    let config = base_config();
    let a = tmp.path().join("a.goxa");
    let b = tmp.path().join("b.goxa");
    create::create(&config, &[root.clone()], &a, NO_RENDER).unwrap();
    create::create(&config, &[root], &b, NO_RENDER).unwrap();
    assert_eq!(fs::read(a).unwrap(), fs::read(b).unwrap());
}

#[test]
fn listing_reports_entries_and_metadata() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("root");
    setup_tree(&root);
    fs::create_dir_all(root.join("emptydir")).unwrap();

    let mut config = base_config();
    config.features.set(F_INCLUDE_HIDDEN);
    let archive = tmp.path().join("test.goxa");
    create::create(&config, &[root], &archive, NO_RENDER).unwrap();

    let listing = extract::list(&config, &archive, &[]).unwrap();
    assert_eq!(listing.version, 2);
    assert_eq!(listing.compression, "zstd");
    assert_eq!(listing.checksum, "blake3");
    assert_eq!(listing.files.len(), TREE.len());
    assert!(listing.dirs.iter().any(|d| d.path == "root/emptydir"));
    assert!(listing.flags.contains(&"Hidden Files"));

    let json = serde_json::to_string(&listing).unwrap();
    assert!(json.contains("\"compression\":\"zstd\""));

    let selected = extract::list(&config, &archive, &["root/dir1".into()]).unwrap();
    assert_eq!(selected.files.len(), 2);
}

#[test]
fn selection_restricts_extraction() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("root");
    setup_tree(&root);
    let config = base_config();
    let archive = tmp.path().join("test.goxa");
    create::create(&config, &[root], &archive, NO_RENDER).unwrap();

    let dest = tmp.path().join("out");
    let selection = vec!["root/dir1".to_string()];
    extract::extract(&config, &archive, &dest, &selection, NO_RENDER).unwrap();

    assert!(dest.join("root/dir1/file1.txt").exists());
    assert!(!dest.join("root/dir2").exists());
    assert!(!dest.join("root/rootfile.txt").exists());
}

#[test]
fn existing_files_refused_without_force() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("root");
    setup_tree(&root);
    let config = base_config();
    let archive = tmp.path().join("test.goxa");
    create::create(&config, &[root], &archive, NO_RENDER).unwrap();

    let dest = tmp.path().join("out");
    extract::extract(&config, &archive, &dest, &[], NO_RENDER).unwrap();

    // Second run hits existing files.
    let err = extract::extract(&config, &archive, &dest, &[], NO_RENDER).unwrap_err();
    assert!(matches!(err, goxa::ArchiveError::Policy(_)), "{}", err);

    let mut forced = base_config();
    forced.force = true;
    let result = extract::extract(&forced, &archive, &dest, &[], NO_RENDER).unwrap();
    assert_eq!(result.files_extracted, 3);
}

#[test]
fn spanned_archives_round_trip() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("root");
    fs::create_dir_all(&root).unwrap();
    let payload: Vec<u8> = (0..200_000u32).flat_map(|i| i.to_le_bytes()).collect();
    fs::write(root.join("big.bin"), &payload).unwrap();

    let mut config = base_config();
    config.features.set(F_NO_COMPRESS);
    config.span_size = Some(64 * 1024);
    let archive = tmp.path().join("spanned.goxa");
    create::create(&config, &[root], &archive, NO_RENDER).unwrap();

    assert!(!archive.exists(), "spanned output replaces the plain file");
    let pieces = fs::read_dir(tmp.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".spanned.goxa"))
        .count();
    assert!(pieces >= 3, "expected at least 3 span pieces, got {}", pieces);

    let dest = tmp.path().join("out");
    extract::extract(&config, &archive, &dest, &[], NO_RENDER).unwrap();
    assert_eq!(fs::read(dest.join("root/big.bin")).unwrap(), payload);
}
