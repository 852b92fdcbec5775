//! Mapping request paths onto files under the document root.

use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::http::response::StatusCode;

/// A regular file that a request resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub path: PathBuf,
    pub len: u64,
    pub modified: Option<SystemTime>,
}

/// Joins the document root and a decoded request path.
///
/// The request path is appended as text, so an absolute request path stays
/// under `root` instead of replacing it the way [`Path::join`] would.
pub fn fs_path(root: &Path, request_path: &str) -> PathBuf {
    let mut joined = root.as_os_str().to_os_string();
    if !request_path.starts_with('/') {
        joined.push("/");
    }
    joined.push(request_path);
    PathBuf::from(joined)
}

/// Stats `path`, falling back to `index` inside it when it is a directory.
pub async fn resolve(path: PathBuf, index: &str) -> Result<Resource, StatusCode> {
    let meta = match tokio::fs::metadata(&path).await {
        Ok(meta) => meta,
        Err(e) if is_missing(&e) => return Err(StatusCode::NotFound),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "stat failed");
            return Err(StatusCode::InternalServerError);
        }
    };

    if !meta.is_dir() {
        return Ok(Resource {
            len: meta.len(),
            modified: meta.modified().ok(),
            path,
        });
    }

    let index_path = path.join(index);
    match tokio::fs::metadata(&index_path).await {
        Ok(meta) if meta.is_file() => Ok(Resource {
            len: meta.len(),
            modified: meta.modified().ok(),
            path: index_path,
        }),
        _ => Err(StatusCode::Forbidden),
    }
}

fn is_missing(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_path_stays_under_root() {
        let root = Path::new("/srv/www");

        assert_eq!(fs_path(root, "/a/b.html"), PathBuf::from("/srv/www/a/b.html"));
        assert_eq!(fs_path(root, "/"), PathBuf::from("/srv/www/"));
        assert_eq!(fs_path(root, "rel.txt"), PathBuf::from("/srv/www/rel.txt"));
    }

    #[tokio::test]
    async fn directory_falls_back_to_index() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "hi").unwrap();

        let found = resolve(dir.path().to_path_buf(), "index.html").await.unwrap();

        assert_eq!(found.path, dir.path().join("index.html"));
        assert_eq!(found.len, 2);
    }

    #[tokio::test]
    async fn index_that_is_a_directory_is_forbidden() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("index.html")).unwrap();

        let err = resolve(dir.path().to_path_buf(), "index.html").await.unwrap_err();

        assert_eq!(err, StatusCode::Forbidden);
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();

        let err = resolve(dir.path().join("nope"), "index.html").await.unwrap_err();

        assert_eq!(err, StatusCode::NotFound);
    }
}
