//! SCP source and sink over any bidirectional byte stream
//!
//! The remote side is `scp -t` (we are the source) or `scp -f` (we are the
//! sink). Records are single lines: `C<mode> <size> <name>` for a file
//! followed by its bytes and a NUL, `D<mode> 0 <name>` to enter a directory,
//! `E` to leave it and `T...` for timestamps. Each record is acknowledged
//! with a NUL byte, or `\x01`/`\x02` plus a message line on failure.

use std::fs::Metadata;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use hippo_exec::ExecError;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::timeout;
use tracing::{debug, warn};

const CHUNK_SIZE: usize = 32 * 1024;

/// One SCP control record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// File header, followed by `size` bytes of content
    File { mode: u32, size: u64, name: String },
    /// Enter a directory
    Dir { mode: u32, name: String },
    /// Leave the current directory
    EndDir,
    /// Modification and access times for the next record
    Time,
}

impl Record {
    /// Parse a control line without its trailing newline
    ///
    /// # Errors
    /// Returns `ExecError::TransferFailed` for malformed records or unsafe names
    pub fn parse(line: &str) -> Result<Self, ExecError> {
        let mut chars = line.chars();
        let kind = chars.next().ok_or_else(|| protocol("empty control record"))?;
        let rest = chars.as_str();

        match kind {
            'C' | 'D' => {
                let mut parts = rest.splitn(3, ' ');
                let (Some(mode), Some(size), Some(name)) = (parts.next(), parts.next(), parts.next())
                else {
                    return Err(protocol(format!("malformed record: {line}")));
                };
                let mode = u32::from_str_radix(mode, 8)
                    .map_err(|_| protocol(format!("bad mode in record: {line}")))?;
                let size = size
                    .parse::<u64>()
                    .map_err(|_| protocol(format!("bad size in record: {line}")))?;
                let name = safe_name(name)?.to_string();

                if kind == 'C' {
                    Ok(Record::File { mode, size, name })
                } else {
                    Ok(Record::Dir { mode, name })
                }
            }
            'E' => Ok(Record::EndDir),
            'T' => Ok(Record::Time),
            _ => Err(protocol(format!("unexpected control record: {line:?}"))),
        }
    }

    /// Control line for this record, newline included
    #[must_use]
    pub fn header(&self) -> String {
        match self {
            Record::File { mode, size, name } => format!("C{mode:04o} {size} {name}\n"),
            Record::Dir { mode, name } => format!("D{mode:04o} 0 {name}\n"),
            Record::EndDir => "E\n".to_string(),
            Record::Time => "T0 0 0 0\n".to_string(),
        }
    }
}

/// Byte stream with a timeout on every read and write
pub struct ScpStream<S> {
    inner: BufReader<S>,
    timeout: Duration,
}

impl<S> ScpStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap a stream; `io_timeout` bounds each individual read or write
    pub fn new(stream: S, io_timeout: Duration) -> Self {
        Self {
            inner: BufReader::new(stream),
            timeout: io_timeout,
        }
    }

    async fn timed<T>(
        limit: Duration,
        fut: impl Future<Output = io::Result<T>>,
    ) -> Result<T, ExecError> {
        timeout(limit, fut)
            .await
            .map_err(|_| ExecError::Timeout { timeout: limit })?
            .map_err(ExecError::from)
    }

    /// Read one line, without its newline. `None` at a clean end of stream.
    async fn read_line(&mut self) -> Result<Option<String>, ExecError> {
        let mut buf = Vec::new();
        let n = Self::timed(self.timeout, self.inner.read_until(b'\n', &mut buf)).await?;
        if n == 0 {
            return Ok(None);
        }
        if buf.last() != Some(&b'\n') {
            return Err(protocol("stream ended inside a control record"));
        }
        buf.pop();
        Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
    }

    /// Wait for the peer's acknowledgement
    async fn read_ack(&mut self) -> Result<(), ExecError> {
        let mut code = [0u8; 1];
        let n = Self::timed(self.timeout, self.inner.read(&mut code)).await?;
        if n == 0 {
            return Err(protocol("connection closed while waiting for acknowledgement"));
        }
        match code[0] {
            0 => Ok(()),
            1 | 2 => {
                let message = self.read_line().await?.unwrap_or_default();
                Err(ExecError::TransferFailed(message.trim().to_string()))
            }
            other => Err(protocol(format!("unexpected acknowledgement byte {other:#04x}"))),
        }
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<(), ExecError> {
        Self::timed(self.timeout, self.inner.write_all(data)).await?;
        Self::timed(self.timeout, self.inner.flush()).await
    }

    async fn ack(&mut self) -> Result<(), ExecError> {
        self.write_all(&[0]).await
    }

    /// Signal end of input to the peer
    ///
    /// # Errors
    /// Returns `ExecError::IoError` if the stream cannot be shut down
    pub async fn finish(&mut self) -> Result<(), ExecError> {
        Self::timed(self.timeout, self.inner.shutdown()).await
    }
}

/// Act as the SCP source: send `local` (file or directory tree) to the sink
///
/// # Errors
/// Returns `ExecError` if a local read fails, the sink rejects a record or
/// an I/O step times out
pub async fn upload<S>(stream: &mut ScpStream<S>, local: &Path) -> Result<(), ExecError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    stream.read_ack().await?;
    send_entry(stream, local.to_path_buf()).await
}

fn send_entry<'a, S>(
    stream: &'a mut ScpStream<S>,
    path: PathBuf,
) -> Pin<Box<dyn Future<Output = Result<(), ExecError>> + Send + 'a>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    Box::pin(async move {
        let meta = fs::metadata(&path).await?;
        let name = path
            .file_name()
            .ok_or_else(|| ExecError::TransferFailed(format!("{} has no file name", path.display())))?
            .to_string_lossy()
            .into_owned();

        if meta.is_dir() {
            let record = Record::Dir {
                mode: file_mode(&meta, 0o755),
                name,
            };
            stream.write_all(record.header().as_bytes()).await?;
            stream.read_ack().await?;

            let mut children = Vec::new();
            let mut entries = fs::read_dir(&path).await?;
            while let Some(entry) = entries.next_entry().await? {
                children.push(entry.path());
            }
            children.sort();
            for child in children {
                send_entry(stream, child).await?;
            }

            stream.write_all(Record::EndDir.header().as_bytes()).await?;
            stream.read_ack().await
        } else {
            let record = Record::File {
                mode: file_mode(&meta, 0o644),
                size: meta.len(),
                name,
            };
            debug!(path = %path.display(), size = meta.len(), "scp sending file");
            stream.write_all(record.header().as_bytes()).await?;
            stream.read_ack().await?;

            let mut file = fs::File::open(&path).await?;
            let mut buf = vec![0u8; CHUNK_SIZE];
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                stream.write_all(&buf[..n]).await?;
            }
            stream.ack().await?;
            stream.read_ack().await
        }
    })
}

/// Act as the SCP sink: receive everything the source sends into `dest_dir`
///
/// Per-file failures (`\x01`) do not stop the transfer of the remaining
/// entries, but are reported together once the source is done.
///
/// # Errors
/// Returns `ExecError::TransferFailed` if the source reports any failure,
/// sends a malformed or unsafe record, and `ExecError` if a local write fails
/// or an I/O step times out
pub async fn download<S>(stream: &mut ScpStream<S>, dest_dir: &Path) -> Result<(), ExecError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut dirs = vec![dest_dir.to_path_buf()];
    let mut failures = Vec::new();
    stream.ack().await?;

    while let Some(line) = stream.read_line().await? {
        match line.as_bytes().first() {
            Some(1) => {
                let message = line[1..].trim().to_string();
                warn!(remote = %message, "scp failure from remote");
                failures.push(message);
                continue;
            }
            Some(2) => {
                return Err(ExecError::TransferFailed(line[1..].trim().to_string()));
            }
            _ => {}
        }

        let current = dirs.last().cloned().unwrap_or_else(|| dest_dir.to_path_buf());
        match Record::parse(&line)? {
            Record::File { mode, size, name } => {
                let path = current.join(&name);
                stream.ack().await?;
                receive_file(stream, &path, size).await?;
                set_file_mode(&path, mode).await;
                stream.read_ack().await?;
                stream.ack().await?;
            }
            Record::Dir { name, .. } => {
                let path = current.join(&name);
                fs::create_dir_all(&path).await?;
                dirs.push(path);
                stream.ack().await?;
            }
            Record::EndDir => {
                if dirs.len() <= 1 {
                    return Err(protocol("unbalanced end-of-directory record"));
                }
                dirs.pop();
                stream.ack().await?;
            }
            Record::Time => stream.ack().await?,
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(ExecError::TransferFailed(failures.join("; ")))
    }
}

async fn receive_file<S>(stream: &mut ScpStream<S>, path: &Path, size: u64) -> Result<(), ExecError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    debug!(path = %path.display(), size, "scp receiving file");

    let mut file = fs::File::create(path).await?;
    let mut remaining = size;
    let mut buf = vec![0u8; CHUNK_SIZE];

    while remaining > 0 {
        let want = usize::try_from(remaining).map_or(CHUNK_SIZE, |r| r.min(CHUNK_SIZE));
        let n = ScpStream::<S>::timed(stream.timeout, stream.inner.read(&mut buf[..want])).await?;
        if n == 0 {
            return Err(protocol(format!(
                "stream ended with {remaining} bytes of {} outstanding",
                path.display()
            )));
        }
        file.write_all(&buf[..n]).await?;
        remaining -= n as u64;
    }

    file.flush().await?;
    Ok(())
}

fn safe_name(name: &str) -> Result<&str, ExecError> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(protocol(format!("refusing unsafe file name {name:?}")));
    }
    Ok(name)
}

fn protocol(message: impl Into<String>) -> ExecError {
    ExecError::TransferFailed(format!("scp protocol error: {}", message.into()))
}

#[cfg(unix)]
fn file_mode(meta: &Metadata, _fallback: u32) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(_meta: &Metadata, fallback: u32) -> u32 {
    fallback
}

#[cfg(unix)]
async fn set_file_mode(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;

    // keep the owner write bit so a later transfer can overwrite the file
    let perms = std::fs::Permissions::from_mode((mode & 0o7777) | 0o200);
    if let Err(e) = fs::set_permissions(path, perms).await {
        warn!(path = %path.display(), error = %e, "failed to set file mode");
    }
}

#[cfg(not(unix))]
async fn set_file_mode(_path: &Path, _mode: u32) {}
