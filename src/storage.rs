use std::path::{Component, Path, PathBuf};

use axum::body::Bytes;
use futures::future::{BoxFuture, FutureExt};
use tokio::{fs, io::AsyncWriteExt};
use tracing::warn;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO {0}")]
    IO(#[from] std::io::Error),
    #[error("invalid file name {0:?}")]
    InvalidName(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Somewhere uploaded bytes can be persisted under a server-chosen name.
pub trait Storage: Send + Sync {
    /// Persists `data` as a new file called `name` and returns where it landed.
    /// An existing file with the same name is never overwritten.
    fn store<'a>(&'a self, name: &'a str, data: Bytes) -> BoxFuture<'a, Result<PathBuf>>;
}

/// A directory on the local filesystem.
#[derive(Clone, Debug)]
pub struct Folder(PathBuf);

impl Folder {
    /// Creates the directory (and its parents) if missing. Existing contents are left alone.
    pub async fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        fs::create_dir_all(&path).await?;
        Ok(Self(without_leading_cur_dir(&path)))
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    pub fn file_path(&self, name: &str) -> PathBuf {
        self.0.join(name)
    }

    async fn write(&self, name: &str, data: Bytes) -> Result<PathBuf> {
        let mut components = Path::new(name).components();
        if !matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        ) {
            return Err(Error::InvalidName(name.to_string()));
        }

        let path = self.file_path(name);
        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o644);
        let mut file = options.open(&path).await?;

        let written = match file.write_all(&data).await {
            Ok(()) => file.flush().await,
            Err(err) => Err(err),
        };
        if let Err(err) = written {
            drop(file);
            if let Err(remove_err) = fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %remove_err, "failed to remove partial upload");
            }
            return Err(err.into());
        }
        Ok(path)
    }
}

/// `./uploads` becomes `uploads`, so reported paths read the same either way.
fn without_leading_cur_dir(path: &Path) -> PathBuf {
    path.components()
        .skip_while(|component| *component == Component::CurDir)
        .collect()
}

impl Storage for Folder {
    fn store<'a>(&'a self, name: &'a str, data: Bytes) -> BoxFuture<'a, Result<PathBuf>> {
        self.write(name, data).boxed()
    }
}
