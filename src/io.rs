use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use memmap2::Mmap;

/// Threshold in bytes above which candidate files are memory-mapped instead
/// of read through a buffered reader.
pub const DEFAULT_MMAP_THRESHOLD_BYTES: u64 = 16 * 1024 * 1024; // 16 MiB

pub type LineIter = Box<dyn Iterator<Item = io::Result<String>> + Send + 'static>;

/// Decide whether to use mmap based on file size and threshold.
pub fn should_use_mmap(file_size_bytes: u64, threshold_bytes: u64) -> bool {
    file_size_bytes > 0 && file_size_bytes >= threshold_bytes
}

/// Iterate lines from a file path using a buffered reader.
pub fn iter_lines_bufread<P: AsRef<Path>>(path: P) -> io::Result<LineIter> {
    let file = File::open(path)?;
    Ok(Box::new(BufLines {
        reader: BufReader::new(file),
        buf: Vec::new(),
    }))
}

/// Iterate lines from a memory-mapped file. The mapping is dropped together
/// with the iterator.
pub fn iter_lines_mmap<P: AsRef<Path>>(path: P) -> io::Result<LineIter> {
    let file = File::open(path)?;
    let mmap = unsafe { Mmap::map(&file) }?;
    Ok(Box::new(MmapLines { mmap, pos: 0 }))
}

struct BufLines {
    reader: BufReader<File>,
    buf: Vec<u8>,
}

impl Iterator for BufLines {
    type Item = io::Result<String>;
    fn next(&mut self) -> Option<Self::Item> {
        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => None,
            Ok(_) => {
                let bytes = self.buf.strip_suffix(b"\n").unwrap_or(&self.buf);
                Some(Ok(line_from_bytes(bytes)))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

struct MmapLines {
    mmap: Mmap,
    pos: usize,
}

impl Iterator for MmapLines {
    type Item = io::Result<String>;
    fn next(&mut self) -> Option<Self::Item> {
        let data: &[u8] = &self.mmap;
        if self.pos >= data.len() {
            return None;
        }
        let start = self.pos;
        if let Some(off) = memchr::memchr(b'\n', &data[self.pos..]) {
            let end = self.pos + off;
            self.pos = end + 1;
            Some(Ok(line_from_bytes(&data[start..end])))
        } else {
            // Last line without trailing newline
            self.pos = data.len();
            Some(Ok(line_from_bytes(&data[start..])))
        }
    }
}

fn line_from_bytes(bytes: &[u8]) -> String {
    // Trim a trailing '\r' if present (handle Windows CRLF)
    let slice = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(slice).into_owned()
}

/// Choose mmap or bufread and return an iterator over lines.
pub fn iter_lines_auto<P: AsRef<Path>>(path: P, threshold_bytes: u64) -> io::Result<LineIter> {
    let meta = std::fs::metadata(&path)?;
    if meta.is_file() && should_use_mmap(meta.len(), threshold_bytes) {
        iter_lines_mmap(path)
    } else {
        iter_lines_bufread(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn collect(iter: LineIter) -> Vec<String> {
        iter.map(|l| l.unwrap()).collect()
    }

    #[test]
    fn both_readers_strip_line_endings() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("words.txt");
        std::fs::write(&path, b"alpha\r\nbeta\n\ngamma").unwrap();
        let expected = vec!["alpha", "beta", "", "gamma"];
        assert_eq!(collect(iter_lines_bufread(&path).unwrap()), expected);
        assert_eq!(collect(iter_lines_mmap(&path).unwrap()), expected);
    }

    #[test]
    fn invalid_utf8_is_replaced_not_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("latin1.txt");
        std::fs::write(&path, b"caf\xe9\nok\n").unwrap();
        let lines = collect(iter_lines_auto(&path, u64::MAX).unwrap());
        assert_eq!(lines, vec!["caf\u{fffd}", "ok"]);
    }

    #[test]
    fn empty_file_never_uses_mmap() {
        assert!(!should_use_mmap(0, 0));
        assert!(should_use_mmap(32, 32));
        assert!(!should_use_mmap(31, 32));
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.txt");
        std::fs::write(&path, b"").unwrap();
        assert!(collect(iter_lines_auto(&path, 0).unwrap()).is_empty());
    }
}
