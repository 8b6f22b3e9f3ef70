//! Mount planning: a read-only workspace base with selective read-write
//! overlays.
//!
//! The first entry always binds the host workspace root at the policy's
//! workspace path. Requested read-write subpaths become separate overlay
//! binds; requesting the root itself (`"."`) flips the base bind to
//! read-write and re-protects the policy directory with a trailing
//! read-only bind. The planner does no I/O beyond `stat` on its inputs.

use std::path::{Path, PathBuf};

use crate::error::MountError;
use crate::policy::{POLICY_DIR, path_segments};

/// One bind mount in the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub source: PathBuf,
    pub target: String,
    pub read_only: bool,
}

impl MountEntry {
    /// Docker `src:dst:mode` bind specification.
    pub fn bind_spec(&self) -> String {
        format!(
            "{}:{}:{}",
            self.source.display(),
            self.target,
            if self.read_only { "ro" } else { "rw" }
        )
    }
}

/// Ordered bind-mount list for the workspace.
#[derive(Debug, Clone, Default)]
pub struct MountPlan {
    pub entries: Vec<MountEntry>,
}

impl MountPlan {
    /// Whether the workspace root itself is mounted read-write.
    pub fn root_is_writable(&self) -> bool {
        self.entries.first().is_some_and(|e| !e.read_only)
    }
}

/// Produce the mount plan for `workdir` with the requested read-write
/// subpaths. `workspace` is the in-container workspace path from the policy.
pub fn plan_mounts(
    workdir: &Path,
    workspace: &str,
    rw_paths: &[String],
) -> Result<MountPlan, MountError> {
    if !workdir.is_dir() {
        return Err(MountError::WorkdirNotFound {
            path: workdir.display().to_string(),
        });
    }

    // Normalize and vet each requested path before any pairing checks so
    // escapes are reported over conflicts.
    let mut normalized: Vec<(String, Vec<String>)> = Vec::with_capacity(rw_paths.len());
    for raw in rw_paths {
        if Path::new(raw).is_absolute() {
            return Err(MountError::PathEscapes { path: raw.clone() });
        }
        let segments = path_segments(raw);
        if segments.iter().any(|s| *s == "..") {
            return Err(MountError::PathEscapes { path: raw.clone() });
        }
        let segments: Vec<String> = segments.into_iter().map(str::to_string).collect();
        if !segments.is_empty() {
            let on_disk = segments.iter().fold(workdir.to_path_buf(), |p, s| p.join(s));
            if !on_disk.exists() {
                return Err(MountError::SubpathNotFound { path: raw.clone() });
            }
        }
        normalized.push((raw.clone(), segments));
    }

    // Parent-child nesting (root counts as parent of everything) is fatal.
    for (i, (a_raw, a)) in normalized.iter().enumerate() {
        for (b_raw, b) in normalized.iter().skip(i + 1) {
            let (parent, child) = if a.len() <= b.len() {
                ((a_raw, a), (b_raw, b))
            } else {
                ((b_raw, b), (a_raw, a))
            };
            if child.1[..parent.1.len()] == parent.1[..] {
                return Err(MountError::PathConflict {
                    parent: parent.0.clone(),
                    child: child.0.clone(),
                });
            }
        }
    }

    let root_writable = normalized.iter().any(|(_, segs)| segs.is_empty());

    let mut entries = vec![MountEntry {
        source: workdir.to_path_buf(),
        target: workspace.to_string(),
        read_only: !root_writable,
    }];

    if root_writable {
        // The policy directory must stay read-only even when the root is
        // writable; otherwise the sandboxed process could rewrite its own
        // policy.
        let policy_dir = workdir.join(POLICY_DIR);
        if policy_dir.is_dir() {
            entries.push(MountEntry {
                source: policy_dir,
                target: format!("{workspace}/{POLICY_DIR}"),
                read_only: true,
            });
        }
    } else {
        for (_, segments) in &normalized {
            let source = segments.iter().fold(workdir.to_path_buf(), |p, s| p.join(s));
            entries.push(MountEntry {
                source,
                target: format!("{workspace}/{}", segments.join("/")),
                read_only: false,
            });
        }
    }

    Ok(MountPlan { entries })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_read_only_base_plan() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan_mounts(dir.path(), "/src", &[]).unwrap();
        assert_eq!(plan.entries.len(), 1);
        assert_eq!(plan.entries[0].source, dir.path());
        assert_eq!(plan.entries[0].target, "/src");
        assert!(plan.entries[0].read_only);
        assert!(!plan.root_is_writable());
    }

    #[test]
    fn test_writable_subdirectory_overlay() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        let plan = plan_mounts(dir.path(), "/src", &strings(&["src"])).unwrap();
        assert_eq!(plan.entries.len(), 2);
        assert!(plan.entries[0].read_only);
        assert_eq!(plan.entries[1].source, dir.path().join("src"));
        assert_eq!(plan.entries[1].target, "/src/src");
        assert!(!plan.entries[1].read_only);
    }

    #[test]
    fn test_root_rw_protects_policy_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".shai")).unwrap();
        let plan = plan_mounts(dir.path(), "/src", &strings(&["."])).unwrap();
        assert_eq!(plan.entries.len(), 2);
        assert!(!plan.entries[0].read_only);
        assert_eq!(plan.entries[1].source, dir.path().join(".shai"));
        assert_eq!(plan.entries[1].target, "/src/.shai");
        assert!(plan.entries[1].read_only);
        assert!(plan.root_is_writable());
    }

    #[test]
    fn test_root_rw_without_policy_dir() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan_mounts(dir.path(), "/src", &strings(&["."])).unwrap();
        assert_eq!(plan.entries.len(), 1);
        assert!(!plan.entries[0].read_only);
    }

    #[test]
    fn test_missing_workdir_rejected() {
        let err = plan_mounts(Path::new("/no/such/dir"), "/src", &[]).unwrap_err();
        assert!(matches!(err, MountError::WorkdirNotFound { .. }));
    }

    #[test]
    fn test_missing_subpath_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = plan_mounts(dir.path(), "/src", &strings(&["absent"])).unwrap_err();
        assert!(matches!(err, MountError::SubpathNotFound { .. }));
    }

    #[test]
    fn test_escaping_path_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = plan_mounts(dir.path(), "/src", &strings(&["../outside"])).unwrap_err();
        assert!(matches!(err, MountError::PathEscapes { .. }));
        let err = plan_mounts(dir.path(), "/src", &strings(&["/etc"])).unwrap_err();
        assert!(matches!(err, MountError::PathEscapes { .. }));
    }

    #[test]
    fn test_root_and_subpath_conflict() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("dir1")).unwrap();
        let err = plan_mounts(dir.path(), "/src", &strings(&[".", "dir1"])).unwrap_err();
        assert!(matches!(err, MountError::PathConflict { .. }));
    }

    #[test]
    fn test_nested_subpaths_conflict() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("dir1/sub")).unwrap();
        let err = plan_mounts(dir.path(), "/src", &strings(&["dir1", "dir1/sub"])).unwrap_err();
        match err {
            MountError::PathConflict { parent, child } => {
                assert_eq!(parent, "dir1");
                assert_eq!(child, "dir1/sub");
            }
            other => panic!("expected PathConflict, got {other:?}"),
        }
    }

    #[test]
    fn test_sibling_subpaths_do_not_conflict() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("a")).unwrap();
        std::fs::create_dir(dir.path().join("ab")).unwrap();
        let plan = plan_mounts(dir.path(), "/src", &strings(&["a", "ab"])).unwrap();
        assert_eq!(plan.entries.len(), 3);
    }

    #[test]
    fn test_dot_slash_prefix_normalized() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        let plan = plan_mounts(dir.path(), "/src", &strings(&["./src"])).unwrap();
        assert_eq!(plan.entries[1].target, "/src/src");
    }

    #[test]
    fn test_bind_spec_format() {
        let entry = MountEntry {
            source: PathBuf::from("/wd"),
            target: "/src".to_string(),
            read_only: true,
        };
        assert_eq!(entry.bind_spec(), "/wd:/src:ro");
    }
}
