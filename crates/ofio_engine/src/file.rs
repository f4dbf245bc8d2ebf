use std::{
    fs::OpenOptions,
    os::{fd::OwnedFd, unix::fs::OpenOptionsExt},
    path::Path,
};

use ofio_core::{Direction, OffloadError, Result};

pub(crate) fn device_error(
    direction: Direction,
    path: &Path,
    detail: impl Into<String>,
) -> OffloadError {
    OffloadError::DeviceIo {
        direction: direction.as_str(),
        path: path.to_path_buf(),
        detail: detail.into(),
    }
}

fn open_options(direction: Direction) -> OpenOptions {
    let mut options = OpenOptions::new();
    match direction {
        Direction::Read => {
            options.read(true);
        }
        Direction::Write => {
            options.write(true).create(true);
        }
    }
    options
}

/// Opens `path` for direct I/O in the given direction.
///
/// `O_DIRECT` is requested first so transfers bypass the page cache and go
/// straight to/from the pinned buffer. Filesystems without direct-I/O
/// support (tmpfs, some network mounts) report `EINVAL`; those fall back to
/// a buffered descriptor so the engine still works there, just without the
/// zero-copy path.
pub(crate) fn open_target(path: &Path, direction: Direction) -> Result<OwnedFd> {
    match open_options(direction)
        .custom_flags(libc::O_DIRECT)
        .open(path)
    {
        Ok(file) => Ok(file.into()),
        Err(e) if e.raw_os_error() == Some(libc::EINVAL) => {
            tracing::debug!(?path, "filesystem rejected O_DIRECT, using buffered I/O");
            open_options(direction)
                .open(path)
                .map(Into::into)
                .map_err(|e| device_error(direction, path, format!("open failed: {e}")))
        }
        Err(e) => Err(device_error(direction, path, format!("open failed: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_file_for_read_is_device_error() {
        let err = open_target(Path::new("/nonexistent/ofio/file"), Direction::Read).unwrap_err();
        assert!(matches!(err, OffloadError::DeviceIo { .. }));
    }

    #[test]
    fn test_open_for_write_creates_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("created-by-open");
        let fd = open_target(&path, Direction::Write).unwrap();
        drop(fd);
        assert!(path.exists());
    }
}
