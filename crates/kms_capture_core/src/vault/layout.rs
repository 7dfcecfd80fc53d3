//! Vault directory layout and lazy creation.

use log::{debug, error};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io;
use std::path::{Component, Path, PathBuf};

/// Vault path failures. Always fatal for a save, before any file is touched.
#[derive(Debug)]
pub enum VaultPathError {
    EmptyRoot,
    /// Configured subdirectory is absolute, empty or escapes the vault.
    InvalidSubdir { name: String, reason: &'static str },
    /// Directory could not be created or is not a directory.
    Uncreatable { path: PathBuf, source: io::Error },
}

impl Display for VaultPathError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyRoot => write!(f, "vault root cannot be empty"),
            Self::InvalidSubdir { name, reason } => {
                write!(f, "invalid vault subdirectory `{name}`: {reason}")
            }
            Self::Uncreatable { path, source } => {
                write!(f, "cannot create vault directory `{}`: {source}", path.display())
            }
        }
    }
}

impl Error for VaultPathError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Uncreatable { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Resolved capture and media directories of one vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultLayout {
    root: PathBuf,
    capture_dir: PathBuf,
    media_dir: PathBuf,
    media_link_base: String,
}

impl VaultLayout {
    /// Resolves subdirectories against `root`. Pure; touches no files.
    ///
    /// # Errors
    /// - `EmptyRoot` when `root` is empty.
    /// - `InvalidSubdir` when a subdirectory is empty, absolute or contains `..`.
    pub fn new(
        root: impl Into<PathBuf>,
        capture_subdir: &str,
        media_subdir: &str,
    ) -> Result<Self, VaultPathError> {
        let root = root.into();
        if root.as_os_str().is_empty() {
            return Err(VaultPathError::EmptyRoot);
        }
        let capture_parts = subdir_components(capture_subdir)?;
        let media_parts = subdir_components(media_subdir)?;

        let capture_dir = capture_parts.iter().fold(root.clone(), |acc, part| acc.join(part));
        let media_dir = media_parts.iter().fold(root.clone(), |acc, part| acc.join(part));
        let media_link_base = relative_link(&capture_parts, &media_parts);

        Ok(Self {
            root,
            capture_dir,
            media_dir,
            media_link_base,
        })
    }

    /// Creates the capture and media directories if absent. Idempotent.
    pub fn ensure(&self) -> Result<(), VaultPathError> {
        for dir in [&self.capture_dir, &self.media_dir] {
            if let Err(source) = std::fs::create_dir_all(dir) {
                error!(
                    "event=vault_ensure module=vault status=error path={} error={}",
                    dir.display(),
                    source
                );
                return Err(VaultPathError::Uncreatable {
                    path: dir.clone(),
                    source,
                });
            }
            if !dir.is_dir() {
                return Err(VaultPathError::Uncreatable {
                    path: dir.clone(),
                    source: io::Error::new(io::ErrorKind::Other, "path exists but is not a directory"),
                });
            }
        }
        debug!(
            "event=vault_ensure module=vault status=ok capture_dir={} media_dir={}",
            self.capture_dir.display(),
            self.media_dir.display()
        );
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn capture_dir(&self) -> &Path {
        &self.capture_dir
    }

    pub fn media_dir(&self) -> &Path {
        &self.media_dir
    }

    /// Media root as a `/`-separated link relative to the capture directory.
    pub fn media_link_base(&self) -> &str {
        &self.media_link_base
    }
}

fn subdir_components(name: &str) -> Result<Vec<String>, VaultPathError> {
    let invalid = |reason| VaultPathError::InvalidSubdir {
        name: name.to_string(),
        reason,
    };
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(invalid("empty"));
    }

    let mut parts = Vec::new();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => {
                let part = part.to_str().ok_or_else(|| invalid("not valid UTF-8"))?;
                parts.push(part.to_string());
            }
            Component::CurDir => {}
            Component::ParentDir => return Err(invalid("must not contain `..`")),
            Component::RootDir | Component::Prefix(_) => {
                return Err(invalid("must be relative to the vault root"))
            }
        }
    }
    if parts.is_empty() {
        return Err(invalid("resolves to the vault root"));
    }
    Ok(parts)
}

fn relative_link(from: &[String], to: &[String]) -> String {
    let shared = from
        .iter()
        .zip(to.iter())
        .take_while(|(left, right)| left == right)
        .count();
    let mut segments = vec![".."; from.len() - shared];
    segments.extend(to[shared..].iter().map(String::as_str));
    segments.join("/")
}

#[cfg(test)]
mod tests {
    use super::{VaultLayout, VaultPathError};

    #[test]
    fn default_layout_links_media_below_captures() {
        let layout =
            VaultLayout::new("/vault", "capture/raw_capture", "capture/raw_capture/media").unwrap();
        assert_eq!(layout.media_link_base(), "media");
        assert_eq!(
            layout.capture_dir(),
            std::path::Path::new("/vault/capture/raw_capture")
        );
    }

    #[test]
    fn sibling_layout_links_through_parent() {
        let layout = VaultLayout::new("/vault", "notes/inbox", "assets").unwrap();
        assert_eq!(layout.media_link_base(), "../../assets");
        let same = VaultLayout::new("/vault", "inbox", "./inbox").unwrap();
        assert_eq!(same.media_link_base(), "");
    }

    #[test]
    fn rejects_escaping_or_absolute_subdirs() {
        assert!(matches!(
            VaultLayout::new("/vault", "../outside", "media"),
            Err(VaultPathError::InvalidSubdir { .. })
        ));
        assert!(matches!(
            VaultLayout::new("/vault", "inbox", "/tmp/media"),
            Err(VaultPathError::InvalidSubdir { .. })
        ));
        assert!(matches!(
            VaultLayout::new("", "inbox", "media"),
            Err(VaultPathError::EmptyRoot)
        ));
    }

    #[test]
    fn ensure_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let layout = VaultLayout::new(dir.path(), "capture/raw", "capture/raw/media").unwrap();
        layout.ensure().unwrap();
        layout.ensure().unwrap();
        assert!(layout.media_dir().is_dir());
    }

    #[test]
    fn ensure_fails_when_a_file_blocks_the_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("capture"), b"not a dir").unwrap();
        let layout = VaultLayout::new(dir.path(), "capture", "capture/media").unwrap();
        assert!(matches!(
            layout.ensure(),
            Err(VaultPathError::Uncreatable { .. })
        ));
    }
}
