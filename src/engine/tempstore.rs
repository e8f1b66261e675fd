//! Recipe-scoped temporary directory and backup keys.

use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// CRC-32Q polynomial in reversed (LSB-first) form.
const CRC32Q_POLY: u32 = 0xD582_8281;

static CRC32Q_TABLE: [u32; 256] = make_table(CRC32Q_POLY);

const fn make_table(poly: u32) -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 == 1 { (crc >> 1) ^ poly } else { crc >> 1 };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// CRC-32 over `data` using the CRC-32Q polynomial.
pub fn crc32q(data: &[u8]) -> u32 {
    let mut crc = !0u32;
    for &byte in data {
        crc = CRC32Q_TABLE[((crc ^ u32::from(byte)) & 0xff) as usize] ^ (crc >> 8);
    }
    !crc
}

/// Stable key for a backed-up path: 8 lowercase hex digits.
pub fn backup_key(path: &Path) -> String {
    format!("{:08x}", crc32q(path.as_os_str().as_bytes()))
}

/// Lazily created temporary directory, removed as a whole at recipe end.
#[derive(Default)]
pub struct TempStore {
    dir: Option<TempDir>,
}

impl TempStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Path of the directory, creating it on first use.
    pub fn path(&mut self) -> io::Result<&Path> {
        if self.dir.is_none() {
            let dir = tempfile::Builder::new().prefix("verdict-").tempdir()?;
            log::debug!("Created temporary directory {}", dir.path().display());
            self.dir = Some(dir);
        }
        match &self.dir {
            Some(dir) => Ok(dir.path()),
            None => Err(io::Error::other("temporary directory unavailable")),
        }
    }

    /// Location of the backup copy for `original`.
    pub fn backup_path(&mut self, original: &Path) -> io::Result<PathBuf> {
        Ok(self.path()?.join(backup_key(original)))
    }

    /// Backup location if the directory already exists.
    pub fn existing_backup_path(&self, original: &Path) -> Option<PathBuf> {
        self.dir
            .as_ref()
            .map(|dir| dir.path().join(backup_key(original)))
    }

    /// Remove the directory and everything in it.
    pub fn cleanup(&mut self) -> io::Result<()> {
        match self.dir.take() {
            Some(dir) => {
                let path = dir.path().to_path_buf();
                dir.close()?;
                log::debug!("Removed temporary directory {}", path.display());
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc32q_known_values() {
        assert_eq!(crc32q(b""), 0);
        assert_eq!(crc32q(b"123456789"), 0xa9cc_8179);
    }

    #[test]
    fn test_backup_key_format() {
        assert_eq!(backup_key(Path::new("/tmp/test.txt")), "bf77fae1");
        assert_ne!(
            backup_key(Path::new("/tmp/a.txt")),
            backup_key(Path::new("/tmp/b.txt"))
        );
    }

    #[test]
    fn test_lazy_creation_and_cleanup() {
        let mut store = TempStore::new();
        assert!(store.existing_backup_path(Path::new("/x")).is_none());

        let path = store.path().unwrap().to_path_buf();
        assert!(path.is_dir());
        std::fs::write(path.join("file"), "data").unwrap();

        let backup = store.backup_path(Path::new("/tmp/test.txt")).unwrap();
        assert_eq!(backup, path.join("bf77fae1"));

        store.cleanup().unwrap();
        assert!(!path.exists());
        assert!(store.existing_backup_path(Path::new("/x")).is_none());
        store.cleanup().unwrap();
    }
}
