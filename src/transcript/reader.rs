use std::fs::File;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;

/// Reads the last `max_bytes` of a JSONL file as lines.
///
/// When the window starts mid-file the first line is dropped, since it is
/// almost certainly a fragment. A torn final line is returned as-is and left
/// for the decoder to reject.
pub fn read_tail(path: &Path, max_bytes: u64) -> io::Result<Vec<String>> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    let offset = len.saturating_sub(max_bytes);
    file.seek(SeekFrom::Start(offset))?;

    let mut lines = collect_lines(BufReader::new(file))?;
    if offset > 0 && !lines.is_empty() {
        lines.remove(0);
    }
    Ok(lines)
}

pub fn read_all(path: &Path) -> io::Result<Vec<String>> {
    collect_lines(BufReader::new(File::open(path)?))
}

fn collect_lines<R: BufRead>(mut reader: R) -> io::Result<Vec<String>> {
    let mut lines = Vec::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\n', '\r']);
        lines.push(line.to_string());
    }
    Ok(lines)
}

/// Non-blank lines, for callers that do not care about the leading fragment.
pub fn non_blank(lines: &[String]) -> impl Iterator<Item = &str> {
    lines.iter().map(String::as_str).filter(|l| !l.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_tail_skips_partial_first_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.jsonl");
        std::fs::write(&path, "{\"n\":1}\n{\"n\":2}\n{\"n\":3}\n").unwrap();

        let lines = read_tail(&path, 12).unwrap();
        assert_eq!(lines, vec!["{\"n\":3}"]);
    }

    #[test]
    fn test_tail_whole_file_when_small() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.jsonl");
        std::fs::write(&path, "{\"n\":1}\n\n{\"n\":2}").unwrap();

        let lines = read_tail(&path, 1024).unwrap();
        assert_eq!(non_blank(&lines).collect::<Vec<_>>(), vec!["{\"n\":1}", "{\"n\":2}"]);
    }

    #[test]
    fn test_missing_file_errors() {
        let dir = TempDir::new().unwrap();
        assert!(read_all(&dir.path().join("nope.jsonl")).is_err());
    }
}
