//! The portable session exercised directly, on every host.

use rangefile::{AccessMode, FileBackend, FileError, StreamFile};
use tempfile::tempdir;

fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn open_read_requires_an_existing_file() {
    let dir = tempdir().unwrap();
    let err = StreamFile::open(&dir.path().join("absent.bin"), AccessMode::Read).unwrap_err();
    assert!(matches!(err, FileError::NoFile));
}

#[test]
fn create_write_read_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("stream.bin");

    let mut file = StreamFile::open(&path, AccessMode::TruncateReadWrite).unwrap();
    file.write_at(0, b"hello stream backend").unwrap();
    assert_eq!(file.len(), 20);

    let mut buf = [0u8; 6];
    let got = file.read_at(6, &mut buf).unwrap();
    assert_eq!(got, 6);
    assert_eq!(&buf, b"stream");
    file.close().unwrap();
}

#[test]
fn reopen_sees_the_persisted_length() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("stream.bin");

    let mut file = StreamFile::open(&path, AccessMode::TruncateReadWrite).unwrap();
    file.write_at(0, &[9u8; 4096]).unwrap();
    file.close().unwrap();

    let file = StreamFile::open(&path, AccessMode::Read).unwrap();
    assert_eq!(file.len(), 4096);
    file.close().unwrap();
}

#[test]
fn short_read_at_end_of_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("stream.bin");

    let mut file = StreamFile::open(&path, AccessMode::TruncateReadWrite).unwrap();
    file.write_at(0, b"ABCD").unwrap();

    let mut buf = [0u8; 16];
    let got = file.read_at(2, &mut buf).unwrap();
    assert_eq!(got, 2);
    assert_eq!(&buf[..2], b"CD");
    file.close().unwrap();
}

#[test]
fn insert_range_stages_the_tail_and_shifts_it() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("stream.bin");

    let mut file = StreamFile::open(&path, AccessMode::TruncateReadWrite).unwrap();
    file.write_at(0, b"ABCDEF").unwrap();
    file.insert_range(3, b"XY").unwrap();
    assert_eq!(file.len(), 8);

    let mut buf = [0u8; 8];
    file.read_at(0, &mut buf).unwrap();
    assert_eq!(&buf, b"ABCXYDEF");
    file.close().unwrap();
}

#[test]
fn remove_range_rewrites_the_survivors() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("stream.bin");

    let mut file = StreamFile::open(&path, AccessMode::TruncateReadWrite).unwrap();
    file.write_at(0, b"0123456789").unwrap();
    file.remove_range(4, 3).unwrap();
    assert_eq!(file.len(), 7);

    let mut buf = [0u8; 7];
    file.read_at(0, &mut buf).unwrap();
    assert_eq!(&buf, b"0123789");
    file.close().unwrap();
}

#[test]
fn zero_range_crosses_the_fill_chunk_boundary() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("stream.bin");

    // Large enough that the zero fill must loop over its staging buffer.
    let len = 200_000usize;
    let mut file = StreamFile::open(&path, AccessMode::TruncateReadWrite).unwrap();
    file.write_at(0, &patterned(len)).unwrap();
    file.zero_range(1, (len - 2) as u64).unwrap();
    assert_eq!(file.len(), len as u64);

    let mut buf = vec![0xFFu8; len];
    file.read_at(0, &mut buf).unwrap();
    assert_eq!(buf[0], 0);
    assert!(buf[1..len - 1].iter().all(|&b| b == 0));
    assert_eq!(buf[len - 1], (((len - 1) % 251) as u8));
    file.close().unwrap();
}

#[test]
fn multi_megabyte_transfer_loops_until_complete() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("stream.bin");

    let data = patterned(3 * 1024 * 1024);
    let mut file = StreamFile::open(&path, AccessMode::TruncateReadWrite).unwrap();
    file.write_at(0, &data).unwrap();
    assert_eq!(file.len(), data.len() as u64);

    let mut back = vec![0u8; data.len()];
    let got = file.read_at(0, &mut back).unwrap();
    assert_eq!(got, data.len());
    assert_eq!(back, data);
    file.close().unwrap();
}

#[test]
fn truncate_to_shrinks_and_grows() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("stream.bin");

    let mut file = StreamFile::open(&path, AccessMode::TruncateReadWrite).unwrap();
    file.write_at(0, &[3u8; 64]).unwrap();

    file.truncate_to(16).unwrap();
    assert_eq!(file.len(), 16);

    file.truncate_to(32).unwrap();
    assert_eq!(file.len(), 32);

    // The grown tail reads as zeros.
    let mut buf = [0xFFu8; 32];
    file.read_at(0, &mut buf).unwrap();
    assert!(buf[..16].iter().all(|&b| b == 3));
    assert!(buf[16..].iter().all(|&b| b == 0));
    file.close().unwrap();
}

#[test]
fn structural_ranges_are_bounds_checked() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("stream.bin");

    let mut file = StreamFile::open(&path, AccessMode::TruncateReadWrite).unwrap();
    file.write_at(0, b"ABCDEF").unwrap();

    let err = file.insert_range(7, b"x").unwrap_err();
    assert!(matches!(err, FileError::BadOffset { offset: 7, len: 6 }));

    let err = file.remove_range(6, 1).unwrap_err();
    assert!(matches!(err, FileError::BadOffset { offset: 6, len: 6 }));

    let err = file.remove_range(2, 5).unwrap_err();
    assert!(matches!(err, FileError::BadOffset { offset: 2, len: 6 }));

    let err = file.zero_range(3, 4).unwrap_err();
    assert!(matches!(err, FileError::BadOffset { offset: 3, len: 6 }));

    // Nothing moved.
    let mut buf = [0u8; 6];
    file.read_at(0, &mut buf).unwrap();
    assert_eq!(&buf, b"ABCDEF");
    file.close().unwrap();
}

#[test]
fn append_extends_from_the_current_end() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("stream.bin");

    let mut file = StreamFile::open(&path, AccessMode::TruncateReadWrite).unwrap();
    file.write_at(0, b"head").unwrap();
    file.append(b"-tail").unwrap();
    assert_eq!(file.len(), 9);

    let mut buf = [0u8; 9];
    file.read_at(0, &mut buf).unwrap();
    assert_eq!(&buf, b"head-tail");
    file.close().unwrap();
}
