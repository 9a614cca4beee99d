use crate::config::SerialConfig;
use crate::error::{AppError, Result};
use std::path::Path;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, error, info, warn};

/// Largest chunk taken from the line per wake-up.
pub const READ_CHUNK: usize = 256;

/// Raw byte stream from the meter.
///
/// Line settings (1200 bps, 7E1, raw mode) are left to the system, e.g.
/// `stty -F /dev/ttyAMA0 1200 cs7 parenb -parodd raw`.
pub struct SerialPort {
    name: String,
    reader: Box<dyn AsyncRead + Unpin + Send>,
    buf: [u8; READ_CHUNK],
    lograw: Option<File>,
}

impl SerialPort {
    pub async fn open(cfg: &SerialConfig) -> Result<Self> {
        let mut port = if cfg.stdin {
            info!("reading meter stream from stdin");
            Self::from_reader("stdin", tokio::io::stdin())
        } else {
            let file = File::open(&cfg.port).await.map_err(|e| {
                AppError::Config(format!("cannot open {}: {}", cfg.port.display(), e))
            })?;
            info!(port = %cfg.port.display(), "serial port opened");
            Self::from_reader(cfg.port.display().to_string(), file)
        };
        if let Some(path) = &cfg.lograw {
            port.capture_to(path).await?;
        }
        Ok(port)
    }

    pub fn from_reader(
        name: impl Into<String>,
        reader: impl AsyncRead + Unpin + Send + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            reader: Box::new(reader),
            buf: [0; READ_CHUNK],
            lograw: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append every chunk read from now on to `path`.
    pub async fn capture_to(&mut self, path: &Path) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| AppError::Config(format!("cannot open {}: {}", path.display(), e)))?;
        self.lograw = Some(file);
        Ok(())
    }

    /// Wait for the next chunk and return its length. Cancel safe; the
    /// bytes are available from [`chunk`](Self::chunk) until the next read.
    ///
    /// End of stream is an error: the meter line never closes.
    pub async fn read(&mut self) -> Result<usize> {
        let n = self.reader.read(&mut self.buf).await?;
        if n == 0 {
            warn!(port = %self.name, "nothing to read");
            return Err(AppError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("{}: end of stream", self.name),
            )));
        }
        debug!(bytes = n, "serial read");
        Ok(n)
    }

    pub fn chunk(&self, len: usize) -> &[u8] {
        &self.buf[..len.min(READ_CHUNK)]
    }

    /// Copy the last chunk to the capture file, if any. Failures are logged
    /// and do not stop the stream.
    pub async fn capture(&mut self, len: usize) {
        let len = len.min(READ_CHUNK);
        if let Some(file) = self.lograw.as_mut() {
            let res = match file.write_all(&self.buf[..len]).await {
                Ok(()) => file.flush().await,
                Err(e) => Err(e),
            };
            if let Err(e) = res {
                error!("lograw write failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_chunks_then_fails_on_eof() {
        let data: &[u8] = b"\x02\nADCO 123456789012 G\r\x03";
        let mut port = SerialPort::from_reader("test", data);
        let n = port.read().await.unwrap();
        assert_eq!(port.chunk(n), data);
        assert!(matches!(port.read().await, Err(AppError::Io(_))));
    }

    #[tokio::test]
    async fn each_wake_up_is_one_chunk() {
        let line = tokio_test::io::Builder::new()
            .read(b"\x02\nAD")
            .read(b"CO 123")
            .build();
        let mut port = SerialPort::from_reader("mock", line);
        let n = port.read().await.unwrap();
        assert_eq!(port.chunk(n), b"\x02\nAD");
        let n = port.read().await.unwrap();
        assert_eq!(port.chunk(n), b"CO 123");
        assert!(port.read().await.is_err());
    }

    #[tokio::test]
    async fn reads_are_bounded() {
        let data = vec![b'x'; READ_CHUNK * 2 + 10];
        let mut port = SerialPort::from_reader("test", std::io::Cursor::new(data));
        let mut total = 0;
        while let Ok(n) = port.read().await {
            assert!(n <= READ_CHUNK);
            total += n;
        }
        assert_eq!(total, READ_CHUNK * 2 + 10);
    }

    #[tokio::test]
    async fn capture_appends_raw_bytes() {
        let path = std::env::temp_dir().join(format!("teleinfo-lograw-{}", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let mut port = SerialPort::from_reader("test", &b"abc"[..]);
        port.capture_to(&path).await.unwrap();
        let n = port.read().await.unwrap();
        port.capture(n).await;
        drop(port);

        assert_eq!(std::fs::read(&path).unwrap(), b"abc");
        let _ = std::fs::remove_file(&path);
    }
}
