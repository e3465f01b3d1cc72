use std::path::PathBuf;
use tokio::{fs::{self, File}, io::AsyncWriteExt};
use uuid::Uuid;

use crate::error::{io, AppResult};

#[derive(Debug, Clone)]
pub struct Spool {
    root: PathBuf,
}

impl Spool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Write-through copy of an upload. Room and file names must already be
    /// validated; writers of the same file are expected to be serialized.
    pub async fn write(&self, room: &str, filename: &str, content: &[u8]) -> AppResult<PathBuf> {
        let dir = self.root.join(room);
        fs::create_dir_all(&dir).await.map_err(io)?;

        // 先寫暫存檔再 rename，避免半寫入的檔案
        let full = dir.join(filename);
        let tmp  = dir.join(format!(".{}.part", Uuid::new_v4().simple()));
        let written: std::io::Result<()> = async {
            let mut file = File::create(&tmp).await?;
            file.write_all(content).await?;
            file.flush().await?;
            drop(file);
            fs::rename(&tmp, &full).await
        }
        .await;
        if written.is_err() {
            let _ = fs::remove_file(&tmp).await;
        }
        written.map_err(io)?;
        Ok(full)
    }
}
