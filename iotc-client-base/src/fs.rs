use std::io;
use std::path::Path;

use async_trait::async_trait;

use crate::capabilities::{BlobSource, FileStats, FileSystem};

/// The local file system, through tokio
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFileSystem;

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn stat(&self, path: &Path) -> io::Result<FileStats> {
        let metadata = tokio::fs::metadata(path).await?;
        Ok(FileStats {
            size: metadata.len(),
        })
    }

    async fn open_read(&self, path: &Path) -> io::Result<BlobSource> {
        let file = tokio::fs::File::open(path).await?;
        Ok(Box::new(file))
    }
}
