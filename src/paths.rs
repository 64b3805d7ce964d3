//! Output layout under the application-private work directory.
//!
//! ```text
//! <work_dir>/
//! ├── placeholders/IMG_0001-3f2a9c0d51e8b7a4.png   # "conversion in progress" cards
//! └── converted/IMG_0001-3f2a9c0d51e8b7a4.jpg      # finished conversions
//! ```
//!
//! File names combine the source stem (for humans) with a hash of the full
//! absolute source path (for uniqueness). Two `IMG_0001.HEIC` files from
//! different folders therefore never overwrite each other, while repeated
//! requests for the same file always map to the same output.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Hex characters of the path hash kept in file names.
const KEY_HASH_LEN: usize = 16;

/// Longest stem kept in file names; the hash carries the uniqueness.
const KEY_STEM_LEN: usize = 48;

/// Paths of placeholders and converted outputs for a given work directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn placeholder_dir(&self) -> PathBuf {
        self.root.join("placeholders")
    }

    pub fn converted_dir(&self) -> PathBuf {
        self.root.join("converted")
    }

    /// Where the in-progress card for `source` is written.
    pub fn placeholder_path(&self, source: &Path) -> PathBuf {
        self.placeholder_dir()
            .join(format!("{}.png", source_key(source)))
    }

    /// Where the finished JPEG for `source` is written.
    pub fn converted_path(&self, source: &Path) -> PathBuf {
        self.converted_dir()
            .join(format!("{}.jpg", source_key(source)))
    }

    /// Create both sub-directories.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.placeholder_dir())?;
        std::fs::create_dir_all(self.converted_dir())
    }
}

/// Make `path` absolute without touching the file system.
///
/// Used for every cache and dedup key so that `a.heic` and `./a.heic`
/// requested from the same working directory are the same task.
pub fn normalize_source(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// `<sanitised stem>-<16 hex chars of sha256(absolute path)>`.
pub fn source_key(source: &Path) -> String {
    let absolute = normalize_source(source);
    let digest = Sha256::digest(absolute.as_os_str().as_encoded_bytes());
    let hash = hex::encode(digest);

    let stem: String = source
        .file_stem()
        .map(|s| s.to_string_lossy())
        .unwrap_or_default()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(KEY_STEM_LEN)
        .collect();

    let stem = if stem.is_empty() { "image".to_string() } else { stem };
    format!("{stem}-{}", &hash[..KEY_HASH_LEN])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_name_in_different_folders_does_not_collide() {
        let a = source_key(Path::new("/photos/2023/IMG_0001.HEIC"));
        let b = source_key(Path::new("/photos/2024/IMG_0001.HEIC"));
        assert_ne!(a, b);
        assert!(a.starts_with("IMG_0001-"));
        assert!(b.starts_with("IMG_0001-"));
    }

    #[test]
    fn key_is_stable() {
        let p = Path::new("/photos/IMG_0001.HEIC");
        assert_eq!(source_key(p), source_key(p));
        assert_eq!(source_key(p).len(), "IMG_0001-".len() + KEY_HASH_LEN);
    }

    #[test]
    fn odd_characters_are_sanitised() {
        let key = source_key(Path::new("/photos/my photo (1).heic"));
        assert!(key.starts_with("my_photo__1_-"), "got: {key}");
    }

    #[test]
    fn relative_and_absolute_forms_share_a_key() {
        let cwd = std::env::current_dir().unwrap();
        let relative = Path::new("IMG_0002.heic");
        assert_eq!(source_key(relative), source_key(&cwd.join(relative)));
    }

    #[test]
    fn layout_separates_placeholders_from_outputs() {
        let layout = OutputLayout::new("/tmp/work");
        let src = Path::new("/photos/IMG_0001.heic");
        let ph = layout.placeholder_path(src);
        let out = layout.converted_path(src);
        assert!(ph.starts_with("/tmp/work/placeholders"));
        assert!(out.starts_with("/tmp/work/converted"));
        assert_eq!(ph.extension().unwrap(), "png");
        assert_eq!(out.extension().unwrap(), "jpg");
        assert_eq!(ph.file_stem(), out.file_stem());
    }
}
