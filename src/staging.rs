use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use actix_multipart::MultipartError;
use actix_web::web::{self, Bytes};
use futures_util::{Stream, StreamExt};
use tempfile::{Builder, TempPath};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::AnalyzeError;

/// Directory that holds uploads while they are being classified.
#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Streams one upload to a file only this request knows about. The name
    /// carries the request id plus a random suffix, never the client's
    /// filename. Exceeding `limit` bytes aborts and removes the partial file.
    pub async fn stage<S>(
        &self,
        request_id: Uuid,
        mut chunks: S,
        limit: usize,
    ) -> Result<StagedUpload, AnalyzeError>
    where
        S: Stream<Item = Result<Bytes, MultipartError>> + Unpin,
    {
        let dir = self.dir.clone();
        let mut file = web::block(move || {
            Builder::new()
                .prefix(&format!("upload-{request_id}-"))
                .suffix(".img")
                .tempfile_in(dir)
        })
        .await??;

        let mut written = 0usize;
        while let Some(chunk) = chunks.next().await {
            let data = chunk?;
            written += data.len();
            if written > limit {
                return Err(AnalyzeError::PayloadTooLarge { limit });
            }
            file = web::block(move || file.write_all(&data).map(|_| file)).await??;
        }

        let path = file.into_temp_path();
        debug!(path = %path.display(), bytes = written, "staged upload");
        Ok(StagedUpload {
            path: Some(path),
            size: written,
        })
    }
}

/// A staged file. Removed from disk when dropped.
#[derive(Debug)]
pub struct StagedUpload {
    path: Option<TempPath>,
    size: usize,
}

impl StagedUpload {
    pub fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or_else(|| Path::new(""))
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

impl Drop for StagedUpload {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            let shown = path.display().to_string();
            if let Err(e) = path.close() {
                warn!(path = %shown, error = %e, "failed to remove staged upload");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use tempfile::tempdir;

    fn chunks(
        parts: &[&'static [u8]],
    ) -> impl Stream<Item = Result<Bytes, MultipartError>> + Unpin {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(p)))
                .collect::<Vec<_>>(),
        )
    }

    fn entries(dir: &Path) -> usize {
        fs::read_dir(dir).unwrap().count()
    }

    #[actix_rt::test]
    async fn stage_writes_all_chunks_then_removes_on_drop() {
        let dir = tempdir().unwrap();
        let area = StagingArea::new(dir.path()).unwrap();
        let id = Uuid::new_v4();

        let staged = area
            .stage(id, chunks(&[b"hello ", b"world"]), 1024)
            .await
            .unwrap();
        let path = staged.path().to_path_buf();

        assert_eq!(staged.size(), 11);
        assert_eq!(fs::read(&path).unwrap(), b"hello world");
        assert!(path.starts_with(dir.path()));
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .contains(&id.to_string()));

        drop(staged);
        assert!(!path.exists());
        assert_eq!(entries(dir.path()), 0);
    }

    #[actix_rt::test]
    async fn same_request_id_still_gets_distinct_files() {
        let dir = tempdir().unwrap();
        let area = StagingArea::new(dir.path()).unwrap();
        let id = Uuid::new_v4();

        let a = area.stage(id, chunks(&[b"a"]), 16).await.unwrap();
        let b = area.stage(id, chunks(&[b"b"]), 16).await.unwrap();

        assert_ne!(a.path(), b.path());
        assert_eq!(fs::read(a.path()).unwrap(), b"a");
        assert_eq!(fs::read(b.path()).unwrap(), b"b");
    }

    #[actix_rt::test]
    async fn oversized_upload_is_rejected_and_removed() {
        let dir = tempdir().unwrap();
        let area = StagingArea::new(dir.path()).unwrap();

        let result = area
            .stage(Uuid::new_v4(), chunks(&[b"0123456789", b"0123456789"]), 15)
            .await;

        assert!(matches!(
            result,
            Err(AnalyzeError::PayloadTooLarge { limit: 15 })
        ));
        assert_eq!(entries(dir.path()), 0);
    }

    #[test]
    fn new_creates_missing_directory() {
        let root = tempdir().unwrap();
        let nested = root.path().join("a").join("b");
        let area = StagingArea::new(&nested).unwrap();
        assert!(area.dir().is_dir());
    }
}
