use std::io;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;

use crate::object_store::ObjectStoreUrl;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("failed to open sink at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to write to sink: {0}")]
    Write(#[source] io::Error),
    #[error(transparent)]
    ObjectStore(#[from] anyhow::Error),
}

enum Inner {
    Stdout,
    Null,
    File(tokio::fs::File),
    /// Buffered locally, uploaded to the object store on close.
    Staged {
        file: tokio::fs::File,
        tmp_path: PathBuf,
        target: ObjectStoreUrl,
    },
}

/// A write-closable destination dispatched from a path string.
///
/// - `"-"` writes to stdout; close is a no-op.
/// - `""` discards everything; close is a no-op.
/// - `s3://bucket/key?...` stages writes to a local temp file and uploads it on close.
/// - anything else is opened as a local file path (parent directories created,
///   append + create, matching the teacher's `inflight.rs` persistence style).
pub struct Sink {
    inner: Inner,
}

impl Sink {
    pub async fn open(path: &str) -> Result<Self, SinkError> {
        let inner = match path {
            "-" => Inner::Stdout,
            "" => Inner::Null,
            p if p.starts_with("s3://") => {
                let target = ObjectStoreUrl::parse(p).map_err(SinkError::ObjectStore)?;
                let tmp_path = std::env::temp_dir().join(format!(
                    "gojob-sink-{}-{}.tmp",
                    std::process::id(),
                    uuid_like_suffix(&target.key)
                ));
                let file = tokio::fs::File::create(&tmp_path)
                    .await
                    .map_err(|source| SinkError::Open {
                        path: path.to_string(),
                        source,
                    })?;
                Inner::Staged {
                    file,
                    tmp_path,
                    target,
                }
            }
            p => {
                let path_buf = PathBuf::from(p);
                if let Some(dir) = path_buf.parent() {
                    if !dir.as_os_str().is_empty() {
                        tokio::fs::create_dir_all(dir).await.map_err(|source| SinkError::Open {
                            path: p.to_string(),
                            source,
                        })?;
                        set_dir_mode(dir).await;
                    }
                }
                let file = open_append_create(&path_buf)
                    .await
                    .map_err(|source| SinkError::Open {
                        path: p.to_string(),
                        source,
                    })?;
                set_file_mode(&file).await;
                Inner::File(file)
            }
        };
        Ok(Self { inner })
    }

    /// Writes `line` followed by a newline.
    pub async fn write_line(&mut self, line: &[u8]) -> Result<(), SinkError> {
        match &mut self.inner {
            Inner::Stdout => {
                let mut stdout = tokio::io::stdout();
                stdout.write_all(line).await.map_err(SinkError::Write)?;
                stdout.write_all(b"\n").await.map_err(SinkError::Write)?;
            }
            Inner::Null => {}
            Inner::File(file) => {
                file.write_all(line).await.map_err(SinkError::Write)?;
                file.write_all(b"\n").await.map_err(SinkError::Write)?;
            }
            Inner::Staged { file, .. } => {
                file.write_all(line).await.map_err(SinkError::Write)?;
                file.write_all(b"\n").await.map_err(SinkError::Write)?;
            }
        }
        Ok(())
    }

    /// Closes the sink, uploading any staged object-store content.
    pub async fn close(self) -> Result<(), SinkError> {
        match self.inner {
            Inner::Stdout | Inner::Null => Ok(()),
            Inner::File(mut file) => {
                file.flush().await.map_err(SinkError::Write)?;
                Ok(())
            }
            Inner::Staged {
                mut file,
                tmp_path,
                target,
            } => {
                file.flush().await.map_err(SinkError::Write)?;
                drop(file);
                target.upload_staged(&tmp_path).await.map_err(SinkError::ObjectStore)?;
                Ok(())
            }
        }
    }
}

async fn open_append_create(path: &Path) -> io::Result<tokio::fs::File> {
    tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
}

#[cfg(unix)]
async fn set_file_mode(file: &tokio::fs::File) {
    use std::os::unix::fs::PermissionsExt;
    let _ = file.set_permissions(std::fs::Permissions::from_mode(0o644)).await;
}

#[cfg(not(unix))]
async fn set_file_mode(_file: &tokio::fs::File) {}

#[cfg(unix)]
async fn set_dir_mode(dir: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let _ = tokio::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o755)).await;
}

#[cfg(not(unix))]
async fn set_dir_mode(_dir: &Path) {}

fn uuid_like_suffix(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Opens `path` for line-oriented reading, used by the host's own input
/// reader. Handles the same scheme dispatch as [`Sink::open`] (object-store
/// URLs are downloaded to a temp file first) plus transparent `.gz`
/// decompression. Lines are trimmed of leading/trailing whitespace.
pub async fn open_read(path: &str) -> anyhow::Result<impl Stream<Item = io::Result<String>>> {
    let local_path = if path.starts_with("s3://") {
        let target = ObjectStoreUrl::parse(path)?;
        let tmp_path = std::env::temp_dir().join(format!(
            "gojob-source-{}-{}.tmp",
            std::process::id(),
            uuid_like_suffix(&target.key)
        ));
        target.download_to(&tmp_path).await?;
        tmp_path
    } else {
        PathBuf::from(path)
    };

    let gzipped = local_path
        .to_string_lossy()
        .ends_with(".gz");

    let (tx, rx) = tokio::sync::mpsc::channel::<io::Result<String>>(64);
    tokio::task::spawn_blocking(move || {
        let result = read_lines_blocking(&local_path, gzipped, &tx);
        if let Err(err) = result {
            let _ = tx.blocking_send(Err(err));
        }
    });

    Ok(ReceiverStream::new(rx))
}

fn read_lines_blocking(
    path: &Path,
    gzipped: bool,
    tx: &tokio::sync::mpsc::Sender<io::Result<String>>,
) -> io::Result<()> {
    use std::io::BufRead;

    let file = std::fs::File::open(path)?;
    if gzipped {
        let decoder = flate2::read::GzDecoder::new(file);
        let reader = std::io::BufReader::new(decoder);
        for line in reader.lines() {
            let line = line?;
            if tx.blocking_send(Ok(line.trim().to_string())).is_err() {
                break;
            }
        }
    } else {
        let reader = std::io::BufReader::new(file);
        for line in reader.lines() {
            let line = line?;
            if tx.blocking_send(Ok(line.trim().to_string())).is_err() {
                break;
            }
        }
    }
    Ok(())
}
