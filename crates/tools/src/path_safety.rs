//! Path normalization against the working-directory boundary.
//!
//! Every user-supplied path is normalized against the declared working
//! directory before any I/O; anything resolving outside is rejected with
//! a security error.

use std::path::{Component, Path, PathBuf};

use sr_domain::error::{Error, Result};

/// Normalize `path` against `work_dir` and require the result to stay
/// inside it. Relative paths are joined onto the working directory;
/// absolute paths must already be within it. `..` components are resolved
/// lexically so escapes are caught without touching the filesystem.
pub fn normalize_and_validate(path: &str, work_dir: &Path) -> Result<PathBuf> {
    let abs_work_dir = lexical_normalize(work_dir);

    let candidate = Path::new(path);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        abs_work_dir.join(candidate)
    };
    let normalized = lexical_normalize(&joined);

    if !normalized.starts_with(&abs_work_dir) {
        return Err(Error::Security(format!(
            "path '{path}' resolves to a location outside the allowed working directory"
        )));
    }
    Ok(normalized)
}

/// Resolve `.` and `..` components without hitting the filesystem.
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn work_dir() -> PathBuf {
        PathBuf::from("/tmp/project")
    }

    #[test]
    fn relative_path_joins_into_work_dir() {
        let p = normalize_and_validate("src/main.rs", &work_dir()).unwrap();
        assert_eq!(p, PathBuf::from("/tmp/project/src/main.rs"));
    }

    #[test]
    fn dot_components_resolve() {
        let p = normalize_and_validate("./src/../src/lib.rs", &work_dir()).unwrap();
        assert_eq!(p, PathBuf::from("/tmp/project/src/lib.rs"));
    }

    #[test]
    fn escape_via_parent_components_is_refused() {
        let err = normalize_and_validate("../../etc/passwd", &work_dir()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("outside the allowed working directory"));
    }

    #[test]
    fn absolute_path_inside_work_dir_is_allowed() {
        let p = normalize_and_validate("/tmp/project/notes.md", &work_dir()).unwrap();
        assert_eq!(p, PathBuf::from("/tmp/project/notes.md"));
    }

    #[test]
    fn absolute_path_outside_work_dir_is_refused() {
        assert!(normalize_and_validate("/etc/passwd", &work_dir()).is_err());
    }

    #[test]
    fn sneaky_prefix_sibling_is_refused() {
        // /tmp/project2 shares a string prefix but is a different tree.
        assert!(normalize_and_validate("/tmp/project2/file", &work_dir()).is_err());
    }

    #[test]
    fn work_dir_itself_is_allowed() {
        let p = normalize_and_validate(".", &work_dir()).unwrap();
        assert_eq!(p, work_dir());
    }
}
