//! Workspace allocator (C2).
//!
//! Every connection gets an isolated directory `<root>/<uuid>`. All file
//! operations tool-side resolve paths relative to that root; `resolve`
//! is the single choke point that rejects anything that would escape it.

use std::path::{Component, Path, PathBuf};

use agentcore_domain::config::WorkspaceConfig;
use agentcore_domain::error::{Error, Result};
use uuid::Uuid;

/// Allocates and guards per-session workspace directories under one root.
///
/// The root itself prefers a persistent path if configured (`AGENT_WORKSPACE_ROOT`),
/// otherwise a local relative directory — see [`WorkspaceConfig`].
#[derive(Debug, Clone)]
pub struct WorkspaceAllocator {
    root: PathBuf,
}

impl WorkspaceAllocator {
    pub fn new(config: &WorkspaceConfig) -> Self {
        Self {
            root: PathBuf::from(&config.root),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create (if absent) and return `<root>/<uuid>`.
    pub async fn allocate(&self, id: Uuid) -> Result<PathBuf> {
        let dir = self.root.join(id.to_string());
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Resolve `relative` against `workspace_dir`, rejecting any path that
    /// would escape it after normalization. Rejects absolute paths that
    /// don't already sit under `workspace_dir`, and any `..` component
    /// that would walk above it — normalization is purely lexical (no
    /// `canonicalize`) so it also rejects escapes through paths that
    /// don't exist yet.
    pub fn resolve(&self, workspace_dir: &Path, relative: &str) -> Result<PathBuf> {
        let candidate = Path::new(relative);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            workspace_dir.join(candidate)
        };

        let mut normalized = PathBuf::new();
        for component in joined.components() {
            match component {
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(Error::PathEscape(relative.to_string()));
                    }
                }
                Component::CurDir => {}
                other => normalized.push(other.as_os_str()),
            }
        }

        if !normalized.starts_with(workspace_dir) {
            return Err(Error::PathEscape(relative.to_string()));
        }

        Ok(normalized)
    }

    /// List files directly under `workspace_dir` with image extensions
    /// filtered out vs. named explicitly — used by the agent runtime to
    /// decide which referenced files become image blocks.
    pub const IMAGE_EXTENSIONS: &'static [&'static str] = &["png", "gif", "jpg", "jpeg", "webp"];

    pub fn is_image_path(path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| Self::IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
            .unwrap_or(false)
    }

    /// Media type for an image extension, normalizing jpg → image/jpeg.
    pub fn media_type_for(path: &Path) -> Option<&'static str> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        Some(match ext.as_str() {
            "png" => "image/png",
            "gif" => "image/gif",
            "jpg" | "jpeg" => "image/jpeg",
            "webp" => "image/webp",
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocator(root: &Path) -> WorkspaceAllocator {
        WorkspaceAllocator {
            root: root.to_path_buf(),
        }
    }

    #[tokio::test]
    async fn allocate_creates_uuid_subdir() {
        let tmp = tempfile::tempdir().unwrap();
        let alloc = allocator(tmp.path());
        let id = Uuid::new_v4();
        let dir = alloc.allocate(id).await.unwrap();
        assert!(dir.is_dir());
        assert_eq!(dir, tmp.path().join(id.to_string()));
    }

    #[test]
    fn resolve_plain_relative_path() {
        let tmp = tempfile::tempdir().unwrap();
        let alloc = allocator(tmp.path());
        let ws = tmp.path().join("s1");
        let resolved = alloc.resolve(&ws, "notes.txt").unwrap();
        assert_eq!(resolved, ws.join("notes.txt"));
    }

    #[test]
    fn resolve_rejects_parent_escape() {
        let tmp = tempfile::tempdir().unwrap();
        let alloc = allocator(tmp.path());
        let ws = tmp.path().join("s1");
        let err = alloc.resolve(&ws, "../../etc/passwd").unwrap_err();
        assert!(matches!(err, Error::PathEscape(_)));
    }

    #[test]
    fn resolve_allows_internal_parent_dir_traversal() {
        let tmp = tempfile::tempdir().unwrap();
        let alloc = allocator(tmp.path());
        let ws = tmp.path().join("s1");
        let resolved = alloc.resolve(&ws, "sub/../notes.txt").unwrap();
        assert_eq!(resolved, ws.join("notes.txt"));
    }

    #[test]
    fn resolve_rejects_foreign_absolute_path() {
        let tmp = tempfile::tempdir().unwrap();
        let alloc = allocator(tmp.path());
        let ws = tmp.path().join("s1");
        let err = alloc.resolve(&ws, "/etc/passwd").unwrap_err();
        assert!(matches!(err, Error::PathEscape(_)));
    }

    #[test]
    fn resolve_accepts_absolute_path_inside_workspace() {
        let tmp = tempfile::tempdir().unwrap();
        let alloc = allocator(tmp.path());
        let ws = tmp.path().join("s1");
        let inside = ws.join("file.txt");
        let resolved = alloc.resolve(&ws, inside.to_str().unwrap()).unwrap();
        assert_eq!(resolved, inside);
    }

    #[test]
    fn image_path_detection_and_media_type() {
        assert!(WorkspaceAllocator::is_image_path(Path::new("a/b.PNG")));
        assert!(WorkspaceAllocator::is_image_path(Path::new("a/b.jpg")));
        assert!(!WorkspaceAllocator::is_image_path(Path::new("a/b.txt")));
        assert_eq!(
            WorkspaceAllocator::media_type_for(Path::new("x.jpg")),
            Some("image/jpeg")
        );
        assert_eq!(
            WorkspaceAllocator::media_type_for(Path::new("x.jpeg")),
            Some("image/jpeg")
        );
        assert_eq!(
            WorkspaceAllocator::media_type_for(Path::new("x.webp")),
            Some("image/webp")
        );
    }
}
