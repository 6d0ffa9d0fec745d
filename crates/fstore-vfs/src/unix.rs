use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use fstore_error::{FsckError, Result};

use crate::CheckFile;

/// A real file opened read-only.
#[derive(Debug)]
pub struct UnixFile {
    path: PathBuf,
    file: File,
    size: u64,
}

impl UnixFile {
    /// Open `path` read-only. The size is sampled once at open time; the
    /// checker assumes nobody is writing the file underneath it.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|_| FsckError::CannotOpen {
            path: path.to_path_buf(),
        })?;
        let size = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            file,
            size,
        })
    }

    /// The path this file was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CheckFile for UnixFile {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        let n = self.file.read_at(buf, offset)?;
        if n < buf.len() {
            // One retry for the short-read-at-EOF case the kernel is
            // allowed to hand back mid-buffer.
            let m = self.file.read_at(&mut buf[n..], offset + n as u64)?;
            if n + m < buf.len() {
                return Err(FsckError::ShortRead {
                    offset,
                    expected: buf.len(),
                    actual: n + m,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn open_and_read_back() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&[7u8; 1024]).unwrap();
        tmp.flush().unwrap();

        let f = UnixFile::open(tmp.path()).unwrap();
        assert_eq!(f.size(), 1024);

        let mut buf = [0u8; 512];
        f.read_at(&mut buf, 512).unwrap();
        assert_eq!(buf, [7u8; 512]);
    }

    #[test]
    fn read_past_eof_is_short() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&[0u8; 100]).unwrap();
        tmp.flush().unwrap();

        let f = UnixFile::open(tmp.path()).unwrap();
        let mut buf = [0u8; 512];
        let err = f.read_at(&mut buf, 0).unwrap_err();
        assert!(matches!(err, FsckError::ShortRead { actual: 100, .. }));
    }

    #[test]
    fn missing_file_is_cannot_open() {
        let err = UnixFile::open(Path::new("/nonexistent/fsck-test")).unwrap_err();
        assert!(matches!(err, FsckError::CannotOpen { .. }));
    }
}
