//! Artifact discovery and publishing.
//!
//! The toolchain drops binaries somewhere under `<project>/…/build/outputs/apk/`
//! with loose naming. This module picks the newest one deterministically and
//! copies it into `<artifacts>/<project>/`, the stable directory the rest of
//! the system serves and deploys from.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use walkdir::WalkDir;

use super::models::Variant;

pub const ARTIFACT_EXTENSION: &str = "apk";

/// Locates build outputs and maintains the published-artifact directories.
#[derive(Debug, Clone)]
pub struct ArtifactResolver {
    published_root: PathBuf,
}

impl ArtifactResolver {
    pub fn new(published_root: impl Into<PathBuf>) -> Self {
        Self {
            published_root: published_root.into(),
        }
    }

    pub fn published_root(&self) -> &Path {
        &self.published_root
    }

    pub fn published_dir(&self, project: &str) -> PathBuf {
        self.published_root.join(project)
    }

    /// Newest artifact produced by the toolchain for `variant`.
    ///
    /// Looks in `app/build/outputs/apk/<variant>/` first; when that directory
    /// does not exist, searches every `build/outputs/apk/` tree under the project.
    pub fn find_latest_in_output_tree(&self, project_dir: &Path, variant: Variant) -> Option<PathBuf> {
        let conventional = project_dir
            .join("app")
            .join("build")
            .join("outputs")
            .join("apk")
            .join(variant.as_str());
        let candidates = if conventional.is_dir() {
            artifacts_in(&conventional)
        } else {
            artifacts_under_output_trees(project_dir)
        };
        newest(candidates)
    }

    /// Newest artifact already published for `project`.
    pub fn find_latest_published(&self, project: &str) -> Option<PathBuf> {
        let dir = self.published_dir(project);
        if !dir.is_dir() {
            return None;
        }
        newest(artifacts_in(&dir))
    }

    /// Copy `artifact` into the project's published directory, keeping its
    /// permissions and modification time. Returns the published path.
    pub fn publish(&self, project: &str, artifact: &Path) -> Result<PathBuf> {
        let file_name = artifact
            .file_name()
            .with_context(|| format!("Artifact path has no file name: {}", artifact.display()))?;
        let dir = self.published_dir(project);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        let target = dir.join(file_name);
        std::fs::copy(artifact, &target).with_context(|| {
            format!("Failed to copy {} to {}", artifact.display(), target.display())
        })?;

        let modified = std::fs::metadata(artifact)
            .and_then(|m| m.modified())
            .with_context(|| format!("Failed to read mtime of {}", artifact.display()))?;
        std::fs::File::options()
            .write(true)
            .open(&target)
            .and_then(|f| f.set_modified(modified))
            .with_context(|| format!("Failed to set mtime of {}", target.display()))?;

        Ok(target)
    }

    /// A published file by name, rejecting anything that is not a plain
    /// file directly inside the project's published directory.
    pub fn published_file(&self, project: &str, file_name: &str) -> Option<PathBuf> {
        if file_name.is_empty()
            || file_name.contains(['/', '\\'])
            || file_name == "."
            || file_name == ".."
        {
            return None;
        }
        let path = self.published_dir(project).join(file_name);
        path.is_file().then_some(path)
    }
}

/// Download path under which a published artifact is served. Both segments
/// are percent-encoded.
pub fn download_path(project: &str, published: &Path) -> String {
    let name = published
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    format!(
        "/artifacts/{}/{}",
        urlencoding::encode(project),
        urlencoding::encode(&name)
    )
}

fn is_artifact(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == ARTIFACT_EXTENSION)
}

/// Artifact files directly inside `dir`.
fn artifacts_in(dir: &Path) -> Vec<PathBuf> {
    let pattern = format!(
        "{}/*.{}",
        glob::Pattern::escape(&dir.to_string_lossy()),
        ARTIFACT_EXTENSION
    );
    match glob::glob(&pattern) {
        Ok(paths) => paths
            .filter_map(|entry| entry.ok())
            .filter(|p| p.is_file())
            .collect(),
        Err(_) => Vec::new(),
    }
}

/// Artifact files anywhere below a `build/outputs/apk` directory under `root`.
fn artifacts_under_output_trees(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() && is_artifact(entry.path()))
        .filter(|entry| {
            entry
                .path()
                .strip_prefix(root)
                .map(inside_output_tree)
                .unwrap_or(false)
        })
        .map(|entry| entry.into_path())
        .collect()
}

fn inside_output_tree(relative: &Path) -> bool {
    let parts: Vec<_> = relative
        .parent()
        .map(|p| p.components().map(|c| c.as_os_str()).collect())
        .unwrap_or_default();
    parts
        .windows(3)
        .any(|w| w[0] == "build" && w[1] == "outputs" && w[2] == "apk")
}

/// Most recently modified path. Equal modification times fall back to
/// ascending lexical path order so the choice is stable across scans.
fn newest(candidates: Vec<PathBuf>) -> Option<PathBuf> {
    let mut stamped: Vec<(SystemTime, PathBuf)> = candidates
        .into_iter()
        .filter_map(|p| {
            let modified = std::fs::metadata(&p).and_then(|m| m.modified()).ok()?;
            Some((modified, p))
        })
        .collect();
    stamped.sort_by(|(a_time, a_path), (b_time, b_path)| match b_time.cmp(a_time) {
        Ordering::Equal => a_path.cmp(b_path),
        other => other,
    });
    stamped.into_iter().next().map(|(_, p)| p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{FileTime, set_file_mtime};
    use std::fs;
    use tempfile::TempDir;

    fn touch(path: &Path, unix_secs: i64) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, path.to_string_lossy().as_bytes()).unwrap();
        set_file_mtime(path, FileTime::from_unix_time(unix_secs, 0)).unwrap();
    }

    fn setup() -> (TempDir, PathBuf, ArtifactResolver) {
        let dir = TempDir::new().unwrap();
        let project = dir.path().join("projects/Foo");
        fs::create_dir_all(&project).unwrap();
        let resolver = ArtifactResolver::new(dir.path().join("artifacts"));
        (dir, project, resolver)
    }

    #[test]
    fn test_conventional_path_prefers_later_mtime_over_name() {
        let (_dir, project, resolver) = setup();
        let out = project.join("app/build/outputs/apk/debug");
        touch(&out.join("a-newer.apk"), 2_000);
        touch(&out.join("z-older.apk"), 1_000);
        assert_eq!(
            resolver.find_latest_in_output_tree(&project, Variant::Debug),
            Some(out.join("a-newer.apk"))
        );

        touch(&out.join("a-newer.apk"), 500);
        assert_eq!(
            resolver.find_latest_in_output_tree(&project, Variant::Debug),
            Some(out.join("z-older.apk"))
        );
    }

    #[test]
    fn test_conventional_path_ignores_other_variant_and_non_apk() {
        let (_dir, project, resolver) = setup();
        touch(&project.join("app/build/outputs/apk/debug/app-debug.apk"), 1_000);
        touch(&project.join("app/build/outputs/apk/debug/output-metadata.json"), 9_000);
        touch(&project.join("app/build/outputs/apk/release/app-release.apk"), 5_000);
        assert_eq!(
            resolver.find_latest_in_output_tree(&project, Variant::Debug),
            Some(project.join("app/build/outputs/apk/debug/app-debug.apk"))
        );
    }

    #[test]
    fn test_fallback_searches_any_module_output_tree() {
        let (_dir, project, resolver) = setup();
        touch(&project.join("mobile/build/outputs/apk/free/debug/mobile-free-debug.apk"), 3_000);
        touch(&project.join("wear/build/outputs/apk/debug/wear-debug.apk"), 2_000);
        touch(&project.join("stray/app.apk"), 9_000);
        assert_eq!(
            resolver.find_latest_in_output_tree(&project, Variant::Release),
            Some(project.join("mobile/build/outputs/apk/free/debug/mobile-free-debug.apk"))
        );
    }

    #[test]
    fn test_empty_conventional_dir_does_not_fall_back() {
        let (_dir, project, resolver) = setup();
        fs::create_dir_all(project.join("app/build/outputs/apk/debug")).unwrap();
        touch(&project.join("lib/build/outputs/apk/debug/lib.apk"), 1_000);
        assert_eq!(resolver.find_latest_in_output_tree(&project, Variant::Debug), None);
    }

    #[test]
    fn test_nothing_built_returns_none() {
        let (_dir, project, resolver) = setup();
        assert_eq!(resolver.find_latest_in_output_tree(&project, Variant::Debug), None);
    }

    #[test]
    fn test_equal_mtimes_break_ties_lexically() {
        let (_dir, project, resolver) = setup();
        let out = project.join("app/build/outputs/apk/debug");
        touch(&out.join("b.apk"), 1_000);
        touch(&out.join("a.apk"), 1_000);
        touch(&out.join("c.apk"), 1_000);
        assert_eq!(
            resolver.find_latest_in_output_tree(&project, Variant::Debug),
            Some(out.join("a.apk"))
        );
    }

    #[test]
    fn test_publish_copies_and_preserves_mtime() {
        let (_dir, project, resolver) = setup();
        let built = project.join("app/build/outputs/apk/debug/app-debug.apk");
        touch(&built, 1_234);

        let published = resolver.publish("Foo", &built).unwrap();
        assert_eq!(published, resolver.published_dir("Foo").join("app-debug.apk"));
        assert_eq!(fs::read(&published).unwrap(), fs::read(&built).unwrap());
        let mtime = FileTime::from_last_modification_time(&fs::metadata(&published).unwrap());
        assert_eq!(mtime.unix_seconds(), 1_234);
    }

    #[test]
    fn test_published_directory_accumulates_and_latest_is_rescanned() {
        let (dir, _project, resolver) = setup();
        assert_eq!(resolver.find_latest_published("Foo"), None);

        let first = dir.path().join("first.apk");
        touch(&first, 1_000);
        resolver.publish("Foo", &first).unwrap();
        let second = dir.path().join("second.apk");
        touch(&second, 2_000);
        resolver.publish("Foo", &second).unwrap();

        assert_eq!(fs::read_dir(resolver.published_dir("Foo")).unwrap().count(), 2);
        assert_eq!(
            resolver.find_latest_published("Foo"),
            Some(resolver.published_dir("Foo").join("second.apk"))
        );
    }

    #[test]
    fn test_published_file_rejects_traversal() {
        let (dir, _project, resolver) = setup();
        let apk = dir.path().join("app.apk");
        touch(&apk, 1_000);
        resolver.publish("Foo", &apk).unwrap();

        assert!(resolver.published_file("Foo", "app.apk").is_some());
        assert!(resolver.published_file("Foo", "../Foo/app.apk").is_none());
        assert!(resolver.published_file("Foo", "..").is_none());
        assert!(resolver.published_file("Foo", "missing.apk").is_none());
    }

    #[test]
    fn test_download_path_uses_file_name() {
        assert_eq!(
            download_path("Foo", Path::new("/state/artifacts/Foo/app-debug.apk")),
            "/artifacts/Foo/app-debug.apk"
        );
    }

    #[test]
    fn test_download_path_encodes_segments() {
        assert_eq!(
            download_path("My App", Path::new("/state/artifacts/My App/app #2?.apk")),
            "/artifacts/My%20App/app%20%232%3F.apk"
        );
    }
}
