//! Append-only source-file listing sink (`spec.md` §4.L).

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::error::{Error, Result};

pub struct Listing {
    file: File,
}

impl Listing {
    pub fn open(path: &Path) -> Result<Listing> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(Error::Io)?;
        Ok(Listing { file })
    }

    /// Appends `path` followed by a NUL byte. `is_dir` adds a trailing `/`
    /// first (or substitutes `/` outright if `path` is empty, matching a
    /// prefix-strip that consumed the whole string). Retries on short
    /// writes.
    pub fn append_path(&mut self, path: &str, is_dir: bool) {
        let mut line = if path.is_empty() {
            "/".to_string()
        } else if is_dir && !path.ends_with('/') {
            format!("{path}/")
        } else {
            path.to_string()
        };
        line.push('\0');
        self.write_all_retrying(line.as_bytes());
    }

    fn write_all_retrying(&mut self, mut buf: &[u8]) {
        while !buf.is_empty() {
            match self.file.write(buf) {
                Ok(0) => continue, // short write of zero bytes: retry
                Ok(n) => buf = &buf[n..],
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn appends_nul_terminated_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sources.list");
        {
            let mut listing = Listing::open(&path).unwrap();
            listing.append_path("/usr/src/pkg/a.c", false);
            listing.append_path("/usr/src/pkg", true);
        }
        let mut contents = Vec::new();
        File::open(&path).unwrap().read_to_end(&mut contents).unwrap();
        assert_eq!(contents, b"/usr/src/pkg/a.c\0/usr/src/pkg/\0");
    }

    #[test]
    fn empty_path_becomes_root_slash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sources.list");
        {
            let mut listing = Listing::open(&path).unwrap();
            listing.append_path("", true);
        }
        let mut contents = Vec::new();
        File::open(&path).unwrap().read_to_end(&mut contents).unwrap();
        assert_eq!(contents, b"/\0");
    }

    #[test]
    fn appends_across_multiple_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sources.list");
        Listing::open(&path).unwrap().append_path("/a", false);
        Listing::open(&path).unwrap().append_path("/b", false);
        let mut contents = Vec::new();
        File::open(&path).unwrap().read_to_end(&mut contents).unwrap();
        assert_eq!(contents, b"/a\0/b\0");
    }
}
