use std::path::Path;

use ofio_engine::{AioConfig, AioHandle, IoEngine, OffloadError};
use rand::RngCore;

const KIBIBYTE: usize = 1024;
const MEBIBYTE: usize = KIBIBYTE * 1024;

fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

fn round_trip(parallelism: usize, single_submit: bool) -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join(format!("roundtrip_p{parallelism}_s{single_submit}"));

    let config = AioConfig::new(4 * KIBIBYTE, 32, single_submit, false, parallelism)?;
    let handle = AioHandle::new(config)?;

    let contents = random_bytes(MEBIBYTE);
    let source = handle.new_pinned_buffer(MEBIBYTE, 1)?;
    source.copy_from_slice(0, &contents);

    let completed = handle.sync_pwrite(&source, &path, 0)?;
    assert_eq!(completed, parallelism);

    let destination = handle.new_pinned_buffer(MEBIBYTE, 1)?;
    let completed = handle.sync_pread(&destination, &path, 0)?;
    assert_eq!(completed, parallelism);

    assert!(destination.as_slice() == contents.as_slice());
    assert!(handle.free_pinned_buffer(&source));
    assert!(handle.free_pinned_buffer(&destination));
    Ok(())
}

#[test]
fn test_round_trip_across_parallelism_and_submit_modes() -> anyhow::Result<()> {
    for parallelism in [1, 2, 4, 8] {
        for single_submit in [false, true] {
            round_trip(parallelism, single_submit)?;
        }
    }
    Ok(())
}

#[test]
fn test_round_trip_at_nonzero_offset() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("offset_roundtrip");
    let handle = AioHandle::new(AioConfig::new(4 * KIBIBYTE, 16, false, false, 2)?)?;

    let contents = random_bytes(64 * KIBIBYTE);
    let source = handle.new_pinned_buffer(64 * KIBIBYTE, 1)?;
    source.copy_from_slice(0, &contents);
    handle.sync_pwrite(&source, &path, 8192)?;

    let destination = handle.new_pinned_buffer(64 * KIBIBYTE, 1)?;
    handle.sync_pread(&destination, &path, 8192)?;
    assert!(destination.as_slice() == contents.as_slice());
    Ok(())
}

#[test]
fn test_non_parallel_read_write_round_trip() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("plain_rw");
    // Parallelism 4 is configured, but read/write force 1 for the call.
    let handle = AioHandle::new(AioConfig::new(4 * KIBIBYTE, 8, false, false, 4)?)?;

    let contents = random_bytes(128 * KIBIBYTE);
    let source = handle.new_pinned_buffer(128 * KIBIBYTE, 1)?;
    source.copy_from_slice(0, &contents);
    assert_eq!(handle.write(&source, &path, false, 0)?, 1);

    let destination = handle.new_pinned_buffer(128 * KIBIBYTE, 1)?;
    assert_eq!(handle.read(&destination, &path, false, 0)?, 1);
    assert!(destination.as_slice() == contents.as_slice());
    Ok(())
}

#[test]
fn test_write_with_validation_passes() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("validated_write");
    let handle = AioHandle::new(AioConfig::new(4 * KIBIBYTE, 16, false, false, 2)?)?;

    let source = handle.new_pinned_buffer(256 * KIBIBYTE, 1)?;
    source.fill_pattern(&[0xDE, 0xAD, 0xBE, 0xEF]);
    let completed = handle.pwrite(&source, &path, true, false, 0)?;
    assert_eq!(completed, 2);
    Ok(())
}

#[test]
fn test_pending_counter_drained_by_wait() -> anyhow::Result<()> {
    const N_OPS: usize = 3;
    let dir = tempfile::tempdir()?;
    let handle = AioHandle::new(AioConfig::new(4 * KIBIBYTE, 16, false, false, 1)?)?;

    let source = handle.new_pinned_buffer(64 * KIBIBYTE, 1)?;
    source.fill_pattern(&[0x42]);
    for i in 0..N_OPS {
        let path = dir.path().join(format!("async_{i}"));
        assert_eq!(handle.async_pwrite(&source, &path, 0)?, 0);
    }
    assert_eq!(handle.pending_ops(), N_OPS);

    // One completed sub-range per op at parallelism 1.
    assert_eq!(handle.wait()?, N_OPS);
    assert_eq!(handle.pending_ops(), 0);

    // wait() is idempotent: nothing pending, returns 0 without blocking.
    assert_eq!(handle.wait()?, 0);
    Ok(())
}

#[test]
fn test_release_refused_while_descriptor_outstanding() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("inflight_release");
    let handle = AioHandle::new(AioConfig::new(4 * KIBIBYTE, 16, false, false, 2)?)?;

    let source = handle.new_pinned_buffer(MEBIBYTE, 1)?;
    source.fill_pattern(&[0x5A]);
    handle.async_pwrite(&source, &path, 0)?;

    // The descriptor holds a reference until wait() retires it, whether the
    // device work has finished or not.
    assert!(!handle.free_pinned_buffer(&source));

    handle.wait()?;
    assert!(handle.free_pinned_buffer(&source));
    Ok(())
}

#[test]
fn test_misaligned_length_rejected_before_any_io() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("never_created");
    let handle = AioHandle::new(AioConfig::new(4 * KIBIBYTE, 16, false, false, 1)?)?;

    // 5000 bytes is not a multiple of the 4 KiB block size.
    let source = handle.new_pinned_buffer(1250, 4)?;
    let err = handle.sync_pwrite(&source, &path, 0).unwrap_err();
    assert!(matches!(err, OffloadError::MisalignedTransfer { .. }));
    assert!(!path.exists());
    Ok(())
}

#[test]
fn test_read_of_missing_file_fails() {
    let handle = AioHandle::new(AioConfig::default()).unwrap();
    let buffer = handle.new_pinned_buffer(MEBIBYTE, 1).unwrap();
    let err = handle
        .sync_pread(&buffer, Path::new("/definitely/not/here"), 0)
        .unwrap_err();
    assert!(matches!(err, OffloadError::DeviceIo { .. }));
}

#[test]
fn test_free_succeeds_immediately_after_sync_transfer() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("free_after_sync");
    let handle = AioHandle::new(AioConfig::new(4 * KIBIBYTE, 16, false, false, 2)?)?;

    // By the time a synchronous call returns, no worker may still hold a
    // reference to the buffer; release must succeed on the very next line,
    // every time. Looped because the original hazard here was a race.
    for _ in 0..500 {
        let buffer = handle.new_pinned_buffer(64 * KIBIBYTE, 1)?;
        buffer.fill_pattern(&[0x7E]);
        handle.sync_pwrite(&buffer, &path, 0)?;
        assert!(handle.free_pinned_buffer(&buffer));
    }
    Ok(())
}

#[test]
fn test_async_read_past_eof_surfaces_error_via_wait() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("short_file");
    // A 4 KiB file cannot satisfy a 16 KiB read; blocks past EOF come back
    // short and the failure must surface from wait(), not be swallowed.
    std::fs::write(&path, vec![0u8; 4 * KIBIBYTE])?;
    let handle = AioHandle::new(AioConfig::new(4 * KIBIBYTE, 16, false, false, 1)?)?;

    let buffer = handle.new_pinned_buffer(16 * KIBIBYTE, 1)?;
    assert_eq!(handle.async_pread(&buffer, &path, 0)?, 0);

    let err = handle.wait().unwrap_err();
    assert!(matches!(err, OffloadError::DeviceIo { .. }));
    assert_eq!(handle.pending_ops(), 0);
    assert!(handle.free_pinned_buffer(&buffer));
    Ok(())
}

#[test]
fn test_async_pwrite_through_existing_fd() -> anyhow::Result<()> {
    use std::os::fd::AsRawFd;

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("fd_target");
    let handle = AioHandle::new(AioConfig::new(4 * KIBIBYTE, 16, false, false, 1)?)?;

    let contents = random_bytes(16 * KIBIBYTE);
    let source = handle.new_pinned_buffer(16 * KIBIBYTE, 1)?;
    source.copy_from_slice(0, &contents);

    let file = std::fs::File::create(&path)?;
    assert_eq!(handle.async_pwrite_fd(&source, file.as_raw_fd(), 0)?, 0);
    assert_eq!(handle.wait()?, 1);
    drop(file);

    assert_eq!(std::fs::read(&path)?, contents);
    Ok(())
}

/// The end-to-end scenario from the design discussion: 4 KiB blocks, queue
/// depth 32, batched submission with overlapped completion polling, four
/// workers cooperating on one 1 MiB transfer.
#[test]
fn test_end_to_end_async_write_then_sync_read() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("end_to_end");
    let config = AioConfig::new(4096, 32, false, true, 4)?;
    let handle = AioHandle::new(config)?;

    let source = handle.new_pinned_buffer(1_048_576, 1)?;
    source.fill_pattern(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);

    assert_eq!(handle.async_pwrite(&source, &path, 0)?, 0);
    // One completed sub-range per partition.
    assert_eq!(handle.wait()?, 4);

    let destination = handle.new_pinned_buffer(1_048_576, 1)?;
    assert_eq!(handle.sync_pread(&destination, &path, 0)?, 4);
    assert!(destination.as_slice() == source.as_slice());

    assert!(handle.free_pinned_buffer(&source));
    assert!(handle.free_pinned_buffer(&destination));
    Ok(())
}
