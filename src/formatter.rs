use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

pub const ATTACHMENT_CAPTION: &str =
    "Response too long for a message. Here's the response as a file:";

/// How a response is going to be delivered.
#[derive(Debug)]
pub enum Formatted {
    Inline(String),
    Attachment(TransientFile),
}

/// Decides between an inline message and a file attachment.
#[derive(Debug, Clone)]
pub struct ResponseFormatter {
    max_inline_chars: usize,
    attachment_dir: PathBuf,
}

impl ResponseFormatter {
    pub fn new(max_inline_chars: usize, attachment_dir: impl Into<PathBuf>) -> Self {
        Self {
            max_inline_chars,
            attachment_dir: attachment_dir.into(),
        }
    }

    /// Length is counted in characters, which is what the platform limits.
    pub fn fits_inline(&self, text: &str) -> bool {
        text.chars().count() <= self.max_inline_chars
    }

    pub async fn format(&self, text: &str) -> Result<Formatted> {
        if self.fits_inline(text) {
            return Ok(Formatted::Inline(text.to_string()));
        }
        let file = TransientFile::create(&self.attachment_dir, text).await?;
        Ok(Formatted::Attachment(file))
    }
}

/// A response written to disk for upload. The file is removed on drop.
#[derive(Debug)]
pub struct TransientFile {
    path: PathBuf,
}

impl TransientFile {
    /// Write `text` to `response_<YYYYMMDD_HHMMSS>.txt` inside `dir`,
    /// adding a counter suffix if that name is taken.
    pub async fn create(dir: &Path, text: &str) -> Result<Self> {
        let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();

        let mut attempt = 0u32;
        loop {
            let name = if attempt == 0 {
                format!("response_{}.txt", stamp)
            } else {
                format!("response_{}_{}.txt", stamp, attempt)
            };
            let path = dir.join(name);

            let mut file = match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(f) => f,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    attempt += 1;
                    continue;
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("Failed to create attachment file: {}", path.display())
                    })
                }
            };

            // From here on the guard owns the file, so a failed write still cleans up.
            let transient = Self { path };
            file.write_all(text.as_bytes())
                .await
                .with_context(|| format!("Failed to write {}", transient.path.display()))?;
            file.flush().await?;

            debug!("Wrote transient attachment {}", transient.path.display());
            return Ok(transient);
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl Drop for TransientFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed transient attachment {}", self.path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", self.path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_response_name(name: &str) -> bool {
        let Some(stem) = name
            .strip_prefix("response_")
            .and_then(|s| s.strip_suffix(".txt"))
        else {
            return false;
        };
        let stamp = &stem[..15.min(stem.len())];
        stamp.len() == 15
            && stamp.as_bytes()[8] == b'_'
            && stamp
                .chars()
                .enumerate()
                .all(|(i, c)| i == 8 || c.is_ascii_digit())
    }

    fn dir_is_empty(dir: &Path) -> bool {
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn test_short_text_is_inline_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let formatter = ResponseFormatter::new(2000, dir.path());

        match formatter.format("4").await.unwrap() {
            Formatted::Inline(text) => assert_eq!(text, "4"),
            Formatted::Attachment(_) => panic!("expected inline"),
        }
        assert!(dir_is_empty(dir.path()));
    }

    #[tokio::test]
    async fn test_threshold_is_inclusive() {
        let dir = tempfile::tempdir().unwrap();
        let formatter = ResponseFormatter::new(2000, dir.path());

        let exact = "a".repeat(2000);
        assert!(matches!(
            formatter.format(&exact).await.unwrap(),
            Formatted::Inline(_)
        ));

        let over = "a".repeat(2001);
        assert!(matches!(
            formatter.format(&over).await.unwrap(),
            Formatted::Attachment(_)
        ));
    }

    #[test]
    fn test_length_counts_chars_not_bytes() {
        let formatter = ResponseFormatter::new(3, ".");
        assert!(formatter.fits_inline("äöü"));
        assert!(!formatter.fits_inline("äöüß"));
    }

    #[tokio::test]
    async fn test_long_text_written_then_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let formatter = ResponseFormatter::new(2000, dir.path());
        let text = "x".repeat(3000);

        let file = match formatter.format(&text).await.unwrap() {
            Formatted::Attachment(file) => file,
            Formatted::Inline(_) => panic!("expected attachment"),
        };

        assert!(is_response_name(&file.file_name()), "{}", file.file_name());
        assert_eq!(std::fs::read_to_string(file.path()).unwrap(), text);

        let path = file.path().to_path_buf();
        drop(file);
        assert!(!path.exists());
        assert!(dir_is_empty(dir.path()));
    }

    #[tokio::test]
    async fn test_same_second_names_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let first = TransientFile::create(dir.path(), "one").await.unwrap();
        let second = TransientFile::create(dir.path(), "two").await.unwrap();

        assert_ne!(first.path(), second.path());
        assert_eq!(std::fs::read_to_string(first.path()).unwrap(), "one");
        assert_eq!(std::fs::read_to_string(second.path()).unwrap(), "two");
    }

    #[tokio::test]
    async fn test_missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(TransientFile::create(&missing, "text").await.is_err());
    }

    #[test]
    fn test_drop_tolerates_already_removed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("response_20250101_000000.txt");
        std::fs::write(&path, "x").unwrap();
        let file = TransientFile { path: path.clone() };
        std::fs::remove_file(&path).unwrap();
        drop(file);
    }
}
