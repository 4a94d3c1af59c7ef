//! Path/URI conversion and project-root detection (spec §4.2, §6).

use std::path::{Path, PathBuf};

use lsp_types::{Position, Url};

use crate::error::LspError;

/// Marker files consulted during ancestor-walk project-root detection,
/// in the order spec §6 lists them. First hit wins.
pub const PROJECT_ROOT_MARKERS: &[&str] = &[
    "pyrightconfig.json",
    "pyproject.toml",
    "package.json",
    "tsconfig.json",
    ".git",
];

/// `vite.config.*` is a glob in the spec; matched separately since it isn't
/// a fixed filename.
const VITE_CONFIG_PREFIX: &str = "vite.config.";

/// Converts a path to an LSP `file://` URI.
///
/// Makes the path absolute (relative to the current directory if needed)
/// and canonicalizes it before conversion, matching the teacher's
/// `path_to_url`.
///
/// ## Errors
/// Returns an error if the current directory can't be read, the path
/// doesn't exist (canonicalize fails), or the canonical path can't be
/// expressed as a `file://` URI.
pub fn path_to_url(path: &Path) -> Result<Url, LspError> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| LspError::DocumentNotFound(format!("failed to get current directory: {e}")))?
            .join(path)
    };

    let canonical = absolute.canonicalize().map_err(|e| {
        LspError::DocumentNotFound(format!("failed to canonicalize path '{}': {}", path.display(), e))
    })?;

    Url::from_file_path(&canonical)
        .map_err(|()| LspError::DocumentNotFound(format!("invalid path: {}", canonical.display())))
}

/// Converts an LSP `file://` URI back to a filesystem path.
pub fn url_to_path(url: &Url) -> Result<PathBuf, LspError> {
    url.to_file_path()
        .map_err(|()| LspError::DocumentNotFound(format!("invalid file URI: {url}")))
}

/// Converts a user-facing 1-indexed (line, column) to an LSP 0-indexed
/// [`Position`].
///
/// ## Errors
/// Returns [`LspError::InvalidPosition`] if either coordinate is 0.
pub fn to_lsp_position(line: u32, column: u32) -> Result<Position, LspError> {
    if line == 0 || column == 0 {
        return Err(LspError::InvalidPosition { line, column });
    }
    Ok(Position {
        line: line - 1,
        character: column - 1,
    })
}

/// Converts an LSP 0-indexed [`Position`] to a user-facing 1-indexed
/// `(line, column)` pair.
pub fn from_lsp_position(position: Position) -> (u32, u32) {
    (position.line + 1, position.character + 1)
}

/// Ancestor-walks from `file`'s parent directory looking for any of the
/// [`PROJECT_ROOT_MARKERS`] or a `vite.config.*` file. First hit wins; if
/// none is found, `file`'s parent directory is used (spec §6).
pub fn detect_project_root(file: &Path) -> PathBuf {
    let start = file
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let mut dir = start.as_path();
    loop {
        if has_marker(dir) {
            return dir.to_path_buf();
        }
        match dir.parent() {
            Some(parent) => dir = parent,
            None => return start,
        }
    }
}

fn has_marker(dir: &Path) -> bool {
    if PROJECT_ROOT_MARKERS.iter().any(|m| dir.join(m).exists()) {
        return true;
    }
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    entries.filter_map(std::result::Result::ok).any(|entry| {
        entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(VITE_CONFIG_PREFIX))
    })
}

/// Returns true if `path` is `root` or a descendant of it. Both are
/// canonicalized before comparison so workspace-membership checks aren't
/// fooled by `..`, symlinks, or relative forms.
pub fn is_within(path: &Path, root: &Path) -> bool {
    let (Ok(path), Ok(root)) = (path.canonicalize(), root.canonicalize()) else {
        return false;
    };
    path.starts_with(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_to_lsp_position() {
        let pos = to_lsp_position(1, 1).unwrap();
        assert_eq!(pos.line, 0);
        assert_eq!(pos.character, 0);

        let pos = to_lsp_position(10, 5).unwrap();
        assert_eq!(pos.line, 9);
        assert_eq!(pos.character, 4);
    }

    #[test]
    fn test_to_lsp_position_invalid() {
        assert!(to_lsp_position(0, 1).is_err());
        assert!(to_lsp_position(1, 0).is_err());
    }

    #[test]
    fn test_position_roundtrip() {
        for (line, column) in [(1, 1), (10, 5), (9999, 1)] {
            let lsp = to_lsp_position(line, column).unwrap();
            assert_eq!(from_lsp_position(lsp), (line, column));
        }
    }

    #[test]
    fn test_detect_project_root_finds_marker() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fs::write(root.join("pyproject.toml"), "").unwrap();
        let nested = root.join("src").join("pkg");
        fs::create_dir_all(&nested).unwrap();
        let file = nested.join("mod.py");
        fs::write(&file, "").unwrap();

        assert_eq!(detect_project_root(&file), root);
    }

    #[test]
    fn test_detect_project_root_falls_back_to_parent() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("lonely.py");
        fs::write(&file, "").unwrap();
        assert_eq!(detect_project_root(&file), tmp.path());
    }

    #[test]
    fn test_is_within() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a").join("b.py");
        fs::create_dir_all(nested.parent().unwrap()).unwrap();
        fs::write(&nested, "").unwrap();

        assert!(is_within(&nested, tmp.path()));

        let outside = tempfile::tempdir().unwrap();
        assert!(!is_within(&nested, outside.path()));
    }
}
