//! Tail of the local process log, attached to uploads for diagnostics.

use std::io::{self, SeekFrom};
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::error::Result;

/// The last few kilobytes of the process log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogExcerpt {
    pub file_name: String,
    pub bytes: Vec<u8>,
    /// Length of the log when the excerpt was taken
    pub end_offset: u64,
}

/// Read at most `max_bytes` from the end of `path`
///
/// When the excerpt starts mid-file, the partial first line is dropped.
/// A missing or empty log yields `None`.
pub async fn read_tail(path: &Path, max_bytes: u64) -> Result<Option<LogExcerpt>> {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let len = file.metadata().await?.len();
    if len == 0 || max_bytes == 0 {
        return Ok(None);
    }

    let start = len.saturating_sub(max_bytes);
    file.seek(SeekFrom::Start(start)).await?;
    let mut bytes = Vec::with_capacity((len - start) as usize);
    file.read_to_end(&mut bytes).await?;

    if start > 0 {
        match bytes.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                bytes.drain(..=pos);
            }
            None => bytes.clear(),
        }
    }

    if bytes.is_empty() {
        return Ok(None);
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "app".to_string());

    Ok(Some(LogExcerpt {
        file_name: format!("{}-excerpt.log", stem),
        bytes,
        end_offset: len,
    }))
}

/// Drop the first `sent_up_to` bytes of the log, keeping what came after
///
/// Lines logged while an upload was in flight stay for the next excerpt.
/// The file is truncated in place rather than replaced so the logger's
/// append-mode handle stays valid.
pub async fn discard_sent(path: &Path, sent_up_to: u64) -> Result<()> {
    let mut file = match tokio::fs::OpenOptions::new()
        .read(true)
        .append(true)
        .open(path)
        .await
    {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    let mut fresh = Vec::new();
    if file.metadata().await?.len() > sent_up_to {
        file.seek(SeekFrom::Start(sent_up_to)).await?;
        file.read_to_end(&mut fresh).await?;
    }

    file.set_len(0).await?;
    if !fresh.is_empty() {
        file.write_all(&fresh).await?;
        file.flush().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_log_is_none() {
        let dir = TempDir::new().unwrap();
        assert_eq!(read_tail(&dir.path().join("app.log"), 1024).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_empty_log_is_none() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, b"").unwrap();
        assert_eq!(read_tail(&path, 1024).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_small_log_is_sent_whole() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, b"line one\nline two\n").unwrap();

        let excerpt = read_tail(&path, 1024).await.unwrap().unwrap();
        assert_eq!(excerpt.file_name, "app-excerpt.log");
        assert_eq!(excerpt.bytes, b"line one\nline two\n");
    }

    #[tokio::test]
    async fn test_tail_starts_at_line_boundary() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, b"aaaaaaaaaa\nbbbb\ncccc\n").unwrap();

        // The last 12 bytes are "a\nbbbb\ncccc\n"; the stray "a" goes
        let excerpt = read_tail(&path, 12).await.unwrap().unwrap();
        assert_eq!(excerpt.bytes, b"bbbb\ncccc\n");
    }

    #[tokio::test]
    async fn test_discard_sent_empties_file_in_place() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, b"old\n").unwrap();

        let excerpt = read_tail(&path, 1024).await.unwrap().unwrap();
        assert_eq!(excerpt.end_offset, 4);

        discard_sent(&path, excerpt.end_offset).await.unwrap();
        assert!(path.exists());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);

        discard_sent(&dir.path().join("missing.log"), 10).await.unwrap();
    }

    #[tokio::test]
    async fn test_discard_sent_keeps_later_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, b"sent one\nsent two\n").unwrap();

        let excerpt = read_tail(&path, 1024).await.unwrap().unwrap();

        let mut log = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        std::io::Write::write_all(&mut log, b"ERROR arrived mid-upload\n").unwrap();

        discard_sent(&path, excerpt.end_offset).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"ERROR arrived mid-upload\n");

        // The logger's handle keeps appending after the rewrite
        std::io::Write::write_all(&mut log, b"next\n").unwrap();
        assert_eq!(
            std::fs::read(&path).unwrap(),
            b"ERROR arrived mid-upload\nnext\n"
        );
    }
}
