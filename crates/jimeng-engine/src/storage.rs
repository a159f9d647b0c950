use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;

const FILE_PREFIX: &str = "jimeng";
const FALLBACK_EXTENSION: &str = "jpg";

/// Output directory holding downloaded images.
#[derive(Debug, Clone)]
pub struct ImageStore {
    dir: PathBuf,
}

impl ImageStore {
    /// Opens the store, creating the directory when it does not exist.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create image directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes one downloaded image. `index` is the image's position in its
    /// generation request.
    pub fn save(&self, bytes: &[u8], index: usize) -> Result<PathBuf> {
        let stamp = Local::now().format("%Y%m%d_%H%M%S_%3f");
        let ext = image_extension(bytes);
        let file_name = sanitize_file_name(&format!("{FILE_PREFIX}_{stamp}_{index:02}.{ext}"));
        let path = self.dir.join(file_name);
        fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }

    pub fn read(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).with_context(|| format!("failed reading {}", path.display()))
    }

    /// Regular files directly inside the output directory.
    pub fn files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("failed to list {}", self.dir.display()))?;
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    /// Removes every regular file in the output directory. Stops at the
    /// first failure.
    pub fn clean_all_images(&self) -> Result<usize> {
        let files = self.files()?;
        for path in &files {
            fs::remove_file(path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
        }
        Ok(files.len())
    }
}

fn image_extension(bytes: &[u8]) -> &'static str {
    match image::guess_format(bytes) {
        Ok(image::ImageFormat::Png) => "png",
        Ok(image::ImageFormat::WebP) => "webp",
        Ok(image::ImageFormat::Gif) => "gif",
        _ => FALLBACK_EXTENSION,
    }
}

/// Replaces characters that are reserved in file names on common platforms.
fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|ch| !ch.is_control())
        .map(|ch| match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            other => other,
        })
        .collect();
    let trimmed = cleaned.trim_matches(|ch: char| ch == '.' || ch.is_whitespace());
    if trimmed.is_empty() {
        format!("{FILE_PREFIX}.{FALLBACK_EXTENSION}")
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];
    const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0, 0];

    #[test]
    fn open_creates_missing_directory() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let dir = temp.path().join("plugins").join("jimeng").join("images");
        let store = ImageStore::open(&dir)?;
        assert!(dir.is_dir());
        assert_eq!(store.dir(), dir.as_path());
        Ok(())
    }

    #[test]
    fn save_uses_timestamped_indexed_names() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = ImageStore::open(temp.path())?;

        let first = store.save(JPEG_MAGIC, 0)?;
        let second = store.save(PNG_MAGIC, 1)?;
        assert_ne!(first, second);

        let first_name = first.file_name().and_then(|v| v.to_str()).unwrap_or("");
        let second_name = second.file_name().and_then(|v| v.to_str()).unwrap_or("");
        assert!(first_name.starts_with("jimeng_"), "{first_name}");
        assert!(first_name.ends_with("_00.jpg"), "{first_name}");
        assert!(second_name.ends_with("_01.png"), "{second_name}");
        assert_eq!(store.read(&first)?, JPEG_MAGIC);
        Ok(())
    }

    #[test]
    fn clean_all_empties_directory_but_keeps_subdirectories() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = ImageStore::open(temp.path())?;
        store.save(JPEG_MAGIC, 0)?;
        store.save(JPEG_MAGIC, 1)?;
        fs::write(temp.path().join("notes.txt"), "x")?;
        fs::create_dir(temp.path().join("nested"))?;

        assert_eq!(store.clean_all_images()?, 3);
        assert!(store.files()?.is_empty());
        assert!(temp.path().join("nested").is_dir());
        assert_eq!(store.clean_all_images()?, 0);
        Ok(())
    }

    #[test]
    fn sanitize_replaces_reserved_characters() {
        assert_eq!(sanitize_file_name("a/b:c?.jpg"), "a_b_c_.jpg");
        assert_eq!(sanitize_file_name(" ..."), "jimeng.jpg");
        assert_eq!(
            sanitize_file_name("jimeng_20240101_000000_00.jpg"),
            "jimeng_20240101_000000_00.jpg"
        );
    }
}
