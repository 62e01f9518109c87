//! Corruption detection and path-safety behavior.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::tempdir;

use goxa::archive::{encode_header, encode_trailer, Block, EntryKind, FileEntry};
use goxa::codec::Codec;
use goxa::config::ArchiveConfig;
use goxa::create;
use goxa::digest::Digest;
use goxa::extract;
use goxa::flags::F_NO_COMPRESS;
use goxa::progress::Snapshot;
use goxa::ArchiveError;

const NO_RENDER: Option<fn(Snapshot)> = None;

fn base_config() -> ArchiveConfig {
    let mut config = ArchiveConfig::default();
    config.space_check = false;
    config
}

fn make_archive(tmp: &Path) -> PathBuf {
    let root = tmp.join("root");
    fs::create_dir_all(&root).unwrap();
    fs::write(root.join("a.txt"), b"alpha").unwrap();
    fs::write(root.join("b.txt"), vec![9u8; 20_000]).unwrap();
    let archive = tmp.join("test.goxa");
    create::create(&base_config(), &[root], &archive, NO_RENDER).unwrap();
    archive
}

fn flip_byte(path: &Path, offset: u64) {
    let mut data = fs::read(path).unwrap();
    data[offset as usize] ^= 0xFF;
    fs::write(path, data).unwrap();
}

#[test]
fn truncated_archive_fails_size_check() {
    let tmp = tempdir().unwrap();
    let archive = make_archive(tmp.path());
    let len = fs::metadata(&archive).unwrap().len();

    let f = fs::OpenOptions::new().write(true).open(&archive).unwrap();
    f.set_len(len - 1).unwrap();

    let err = extract::parse_archive(&base_config(), &archive).unwrap_err();
    assert!(
        matches!(err, ArchiveError::Integrity(ref m) if m.contains("archive size")),
        "{}",
        err
    );
}

#[test]
fn flipped_header_digest_fails_verification() {
    let tmp = tempdir().unwrap();
    let archive = make_archive(tmp.path());

    // The first file's offset marks the end of the header image.
    let info = extract::parse_archive(&base_config(), &archive).unwrap();
    let header_len = info.files[0].offset;
    flip_byte(&archive, header_len - 1);

    let err = extract::parse_archive(&base_config(), &archive).unwrap_err();
    assert!(
        matches!(err, ArchiveError::Integrity(ref m) if m.contains("header digest")),
        "{}",
        err
    );
}

#[test]
fn corrupt_trailer_aborts_before_any_file_is_written() {
    let tmp = tempdir().unwrap();
    let archive = make_archive(tmp.path());
    let len = fs::metadata(&archive).unwrap().len();
    flip_byte(&archive, len - 1);

    let dest = tmp.path().join("out");
    let err = extract::extract(&base_config(), &archive, &dest, &[], NO_RENDER).unwrap_err();
    assert!(
        matches!(err, ArchiveError::Integrity(ref m) if m.contains("trailer digest")),
        "{}",
        err
    );
    // Parsing failed, so the destination holds nothing.
    let entries = fs::read_dir(&dest)
        .map(|it| it.count())
        .unwrap_or(0);
    assert_eq!(entries, 0);
}

/// Builds a syntactically valid archive by hand so hostile metadata can be
/// injected: one uncompressed regular file with the given stored path and
/// recorded size.
fn forge_archive(path: &Path, stored_path: &str, recorded_size: u64, payload: &[u8]) {
    let flags = F_NO_COMPRESS;
    let digest = Digest::Blake3;
    let digest_len = 32;

    let mut entry = FileEntry::new(stored_path.to_string(), PathBuf::new(), EntryKind::Regular);
    entry.size = recorded_size;

    let header_len = encode_header(
        &[], &[entry.clone()], 0, 0, flags, Codec::Zstd.tag(), digest, digest_len, 0,
    )
    .unwrap()
    .len() as u64;

    entry.blocks = vec![Block { offset: header_len, size: payload.len() as u64 }];
    let trailer = encode_trailer(&[entry.clone()], digest, digest_len);
    let trailer_offset = header_len + payload.len() as u64;
    let archive_size = trailer_offset + trailer.len() as u64;

    let header = encode_header(
        &[],
        &[entry],
        trailer_offset,
        archive_size,
        flags,
        Codec::Zstd.tag(),
        digest,
        digest_len,
        0,
    )
    .unwrap();

    let mut bytes = header;
    bytes.extend_from_slice(payload);
    bytes.extend_from_slice(&trailer);
    fs::write(path, bytes).unwrap();
}

#[test]
fn escaping_stored_path_is_rejected() {
    let tmp = tempdir().unwrap();
    let archive = tmp.path().join("evil.goxa");
    forge_archive(&archive, "../../evil", 4, b"evil");

    let dest = tmp.path().join("deep/dest");
    let err = extract::extract(&base_config(), &archive, &dest, &[], NO_RENDER).unwrap_err();
    assert!(matches!(err, ArchiveError::Path { .. }), "{}", err);
    assert!(!tmp.path().join("evil").exists());
    assert!(!tmp.path().parent().unwrap().join("evil").exists());
}

#[test]
fn decompressed_size_contract_is_enforced() {
    let tmp = tempdir().unwrap();
    let archive = tmp.path().join("lying.goxa");
    // Header claims 10 bytes, the payload holds 4.
    forge_archive(&archive, "lying.bin", 10, b"evil");

    let dest = tmp.path().join("out");
    let err = extract::extract(&base_config(), &archive, &dest, &[], NO_RENDER).unwrap_err();
    assert!(
        matches!(err, ArchiveError::Integrity(ref m) if m.contains("expected")),
        "{}",
        err
    );
}

#[test]
fn unknown_version_is_refused() {
    let tmp = tempdir().unwrap();
    let archive = make_archive(tmp.path());
    // Version field sits right after the 4-byte magic.
    flip_byte(&archive, 4);

    let err = extract::parse_archive(&base_config(), &archive).unwrap_err();
    assert!(
        matches!(err, ArchiveError::Format(ref m) if m.contains("version")),
        "{}",
        err
    );
}

#[test]
fn wrong_magic_is_refused() {
    let tmp = tempdir().unwrap();
    let archive = make_archive(tmp.path());
    flip_byte(&archive, 0);

    let err = extract::parse_archive(&base_config(), &archive).unwrap_err();
    assert!(matches!(err, ArchiveError::Format(_)), "{}", err);
}
