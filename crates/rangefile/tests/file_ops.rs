use rangefile::{
    clear_file, file_size, read_file, rewrite_file, write_file, FileError, FileFlags, OFFSET_EOF,
};
use tempfile::tempdir;

fn read_all(path: &std::path::Path, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    let got = read_file(path, &mut buf, 0, FileFlags::empty()).unwrap();
    buf.truncate(got);
    buf
}

#[test]
fn rewrite_and_read_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cache.bin");

    rewrite_file(&path, b"HelloWorld", FileFlags::empty()).unwrap();
    assert_eq!(file_size(&path, FileFlags::empty()).unwrap(), 10);
    assert_eq!(read_all(&path, 10), b"HelloWorld");
}

#[test]
fn rewrite_replaces_longer_contents() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cache.bin");

    rewrite_file(&path, b"a much longer first generation", FileFlags::empty()).unwrap();
    rewrite_file(&path, b"short", FileFlags::empty()).unwrap();

    assert_eq!(file_size(&path, FileFlags::empty()).unwrap(), 5);
    assert_eq!(read_all(&path, 16), b"short");
}

#[test]
fn size_query_tracks_every_write() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cache.bin");

    rewrite_file(&path, &[7u8; 100], FileFlags::empty()).unwrap();
    assert_eq!(file_size(&path, FileFlags::empty()).unwrap(), 100);

    write_file(&path, &[1u8; 50], 75, FileFlags::empty()).unwrap();
    assert_eq!(file_size(&path, FileFlags::empty()).unwrap(), 125);
}

#[test]
fn append_via_eof_sentinel() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cache.bin");

    rewrite_file(&path, b"A", FileFlags::empty()).unwrap();
    write_file(&path, b"BC", OFFSET_EOF, FileFlags::empty()).unwrap();

    assert_eq!(file_size(&path, FileFlags::empty()).unwrap(), 3);
    assert_eq!(read_all(&path, 3), b"ABC");
}

#[test]
fn repeated_eof_writes_concatenate_in_order() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cache.bin");

    rewrite_file(&path, b"one", FileFlags::empty()).unwrap();
    write_file(&path, b"-two", OFFSET_EOF, FileFlags::empty()).unwrap();
    write_file(&path, b"-three", OFFSET_EOF, FileFlags::empty()).unwrap();

    assert_eq!(read_all(&path, 32), b"one-two-three");
}

#[test]
fn write_overwrites_in_place() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cache.bin");

    rewrite_file(&path, b"HelloWorld", FileFlags::empty()).unwrap();
    write_file(&path, b"Jelly", 0, FileFlags::empty()).unwrap();

    assert_eq!(file_size(&path, FileFlags::empty()).unwrap(), 10);
    assert_eq!(read_all(&path, 10), b"JellyWorld");
}

#[test]
fn write_with_truncate_flag_restarts_the_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cache.bin");

    rewrite_file(&path, b"0123456789", FileFlags::empty()).unwrap();
    write_file(&path, b"new", OFFSET_EOF, FileFlags::TRUNCATE).unwrap();

    assert_eq!(file_size(&path, FileFlags::empty()).unwrap(), 3);
    assert_eq!(read_all(&path, 8), b"new");
}

#[test]
fn read_with_eof_sentinel_returns_the_tail() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cache.bin");

    rewrite_file(&path, b"0123456789", FileFlags::empty()).unwrap();

    let mut buf = [0u8; 4];
    let got = read_file(&path, &mut buf, OFFSET_EOF, FileFlags::empty()).unwrap();
    assert_eq!(got, 4);
    assert_eq!(&buf, b"6789");

    // A buffer larger than the file degenerates to reading everything.
    let mut all = [0u8; 32];
    let got = read_file(&path, &mut all, OFFSET_EOF, FileFlags::empty()).unwrap();
    assert_eq!(&all[..got], b"0123456789");
}

#[test]
fn short_read_stops_at_end_of_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cache.bin");

    rewrite_file(&path, b"ABCDEF", FileFlags::empty()).unwrap();

    let mut buf = [0u8; 16];
    let got = read_file(&path, &mut buf, 4, FileFlags::empty()).unwrap();
    assert_eq!(got, 2);
    assert_eq!(&buf[..2], b"EF");
}

#[test]
fn clear_preserves_length_and_zeroes_only_the_range() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cache.bin");

    rewrite_file(&path, b"0123456789", FileFlags::empty()).unwrap();
    clear_file(&path, 3, 4, FileFlags::empty()).unwrap();

    assert_eq!(file_size(&path, FileFlags::empty()).unwrap(), 10);
    assert_eq!(read_all(&path, 10), b"0123\0\0\0789");
}

#[test]
fn clear_with_eof_sentinel_zeroes_the_tail() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cache.bin");

    rewrite_file(&path, b"0123456789", FileFlags::empty()).unwrap();
    clear_file(&path, 4, OFFSET_EOF, FileFlags::empty()).unwrap();

    assert_eq!(file_size(&path, FileFlags::empty()).unwrap(), 10);
    assert_eq!(read_all(&path, 10), b"012345\0\0\0\0");
}

#[test]
fn bad_offset_read_leaves_no_trace() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cache.bin");

    rewrite_file(&path, b"A", FileFlags::empty()).unwrap();

    let mut buf = [0u8; 1];
    let err = read_file(&path, &mut buf, 1, FileFlags::empty()).unwrap_err();
    assert!(matches!(err, FileError::BadOffset { offset: 1, len: 1 }));
    assert_eq!(file_size(&path, FileFlags::empty()).unwrap(), 1);
}

#[test]
fn write_past_the_end_is_rejected_without_modification() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cache.bin");

    rewrite_file(&path, b"AB", FileFlags::empty()).unwrap();

    let err = write_file(&path, b"x", 3, FileFlags::empty()).unwrap_err();
    assert!(matches!(err, FileError::BadOffset { offset: 3, len: 2 }));
    assert_eq!(read_all(&path, 8), b"AB");
}

#[test]
fn zero_sizes_are_rejected_everywhere() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cache.bin");

    rewrite_file(&path, b"data", FileFlags::empty()).unwrap();

    let mut empty = [0u8; 0];
    assert!(matches!(
        read_file(&path, &mut empty, 0, FileFlags::empty()),
        Err(FileError::BadSize)
    ));
    assert!(matches!(
        write_file(&path, b"", 0, FileFlags::empty()),
        Err(FileError::BadSize)
    ));
    assert!(matches!(
        rewrite_file(&path, b"", FileFlags::empty()),
        Err(FileError::BadSize)
    ));
    assert!(matches!(
        clear_file(&path, 0, 0, FileFlags::empty()),
        Err(FileError::BadSize)
    ));

    assert_eq!(read_all(&path, 8), b"data");
}

#[test]
fn missing_file_is_no_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("absent.bin");

    let mut buf = [0u8; 1];
    assert!(matches!(
        read_file(&path, &mut buf, 0, FileFlags::empty()),
        Err(FileError::NoFile)
    ));
    assert!(matches!(
        write_file(&path, b"x", 0, FileFlags::empty()),
        Err(FileError::NoFile)
    ));
    assert!(matches!(
        file_size(&path, FileFlags::empty()),
        Err(FileError::NoFile)
    ));
}

#[test]
fn reading_an_empty_file_is_no_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("empty.bin");
    std::fs::write(&path, b"").unwrap();

    let mut buf = [0u8; 1];
    assert!(matches!(
        read_file(&path, &mut buf, 0, FileFlags::empty()),
        Err(FileError::NoFile)
    ));
    assert_eq!(file_size(&path, FileFlags::empty()).unwrap(), 0);
}

#[test]
fn empty_path_is_bad_path() {
    assert!(matches!(
        file_size("", FileFlags::empty()),
        Err(FileError::BadPath)
    ));
}

#[cfg(unix)]
#[test]
fn size_query_can_address_the_link_itself() {
    let dir = tempdir().unwrap();
    let target = dir.path().join("target.bin");
    let link = dir.path().join("link.bin");

    rewrite_file(&target, &[0xA5u8; 64], FileFlags::empty()).unwrap();
    std::os::unix::fs::symlink(&target, &link).unwrap();

    assert_eq!(file_size(&link, FileFlags::empty()).unwrap(), 64);

    let link_len = file_size(&link, FileFlags::OPEN_SYMLINK).unwrap();
    assert_eq!(link_len, target.as_os_str().len() as u64);
}

#[cfg(unix)]
#[test]
fn writing_a_read_only_file_is_bad_access() {
    use std::os::unix::fs::PermissionsExt;

    // Permission bits do not bind the superuser.
    if unsafe { libc::geteuid() } == 0 {
        return;
    }

    let dir = tempdir().unwrap();
    let path = dir.path().join("frozen.bin");
    rewrite_file(&path, b"frozen", FileFlags::empty()).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o444)).unwrap();

    let err = write_file(&path, b"thaw", 0, FileFlags::empty()).unwrap_err();
    assert!(matches!(err, FileError::BadAccess));
}

#[test]
fn terminal_query_answers_for_every_stream() {
    // Under a test harness the streams are usually pipes; the call must
    // still answer rather than fail.
    for stream in [
        rangefile::StdStream::Input,
        rangefile::StdStream::Output,
        rangefile::StdStream::Error,
    ] {
        let _ = rangefile::stream_is_terminal(stream);
    }
}
