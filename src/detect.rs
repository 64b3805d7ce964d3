//! Format detection: which paths this crate converts at all.
//!
//! Everything that does not carry one of [`HEIC_EXTENSIONS`] is passed
//! through untouched by [`crate::HeicConverter`].

use std::path::Path;

/// Extensions (lower-case, without dot) of the HEIF still-image container.
pub const HEIC_EXTENSIONS: [&str; 2] = ["heic", "heif"];

/// `true` when the path's extension is `.heic` or `.heif`, in any case.
pub fn is_heic_path(path: impl AsRef<Path>) -> bool {
    path.as_ref()
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| HEIC_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_both_extensions_in_any_case() {
        assert!(is_heic_path("/photos/IMG_0001.HEIC"));
        assert!(is_heic_path("IMG_0001.heic"));
        assert!(is_heic_path("burst.HeIf"));
    }

    #[test]
    fn rejects_everything_else() {
        assert!(!is_heic_path("/photos/IMG_0001.jpg"));
        assert!(!is_heic_path("heic"));
        assert!(!is_heic_path("archive.heic.zip"));
        assert!(!is_heic_path(".heic"));
        assert!(!is_heic_path(""));
    }
}
