use crate::error::FrameError;
use crate::frame::MAX_FRAME_LENGTH;
use tracing::{error, info};

/// Start of frame.
pub const STX: u8 = 0x02;
/// End of frame.
pub const ETX: u8 = 0x03;
/// Frame interrupted for out-of-band data.
pub const EOT: u8 = 0x04;

/// Reassembles STX .. ETX delimited buffers out of the raw serial stream.
///
/// STX is an unconditional resynchronisation point: whatever was being
/// filled is dropped.
#[derive(Debug)]
pub struct Demultiplexer {
    buffer: Vec<u8>,
    filling: bool,
    previous: Option<Vec<u8>>,
    duplicates: u64,
    max_len: usize,
}

impl Default for Demultiplexer {
    fn default() -> Self {
        Self::new()
    }
}

impl Demultiplexer {
    pub fn new() -> Self {
        Self::with_max_len(MAX_FRAME_LENGTH)
    }

    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(max_len),
            filling: false,
            previous: None,
            duplicates: 0,
            max_len,
        }
    }

    pub fn is_filling(&self) -> bool {
        self.filling
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }

    /// Feed one byte. Returns a completed candidate buffer on ETX.
    ///
    /// `Err(DuplicateFrame)` is a silent drop already counted in
    /// [`duplicates`](Self::duplicates); other errors mean the buffer being
    /// filled was aborted.
    pub fn consume(&mut self, byte: u8) -> Result<Option<Vec<u8>>, FrameError> {
        match byte {
            STX => {
                self.buffer.clear();
                self.filling = true;
                Ok(None)
            }
            ETX => {
                if !self.filling {
                    return Ok(None);
                }
                self.filling = false;
                let completed = std::mem::take(&mut self.buffer);
                if self.previous.as_deref() == Some(completed.as_slice()) {
                    info!("dropping duplicate frame");
                    self.duplicates += 1;
                    self.buffer = completed;
                    self.buffer.clear();
                    return Err(FrameError::DuplicateFrame);
                }
                self.previous = Some(completed.clone());
                Ok(Some(completed))
            }
            EOT => {
                self.abort();
                error!("received an interrupt, dropping frame");
                Err(FrameError::FrameInterrupted)
            }
            _ if !self.filling => Ok(None),
            _ => {
                if self.buffer.len() >= self.max_len {
                    self.abort();
                    error!(max = self.max_len, "max buffer length reached, dropping frame");
                    return Err(FrameError::BufferOverflow(self.max_len));
                }
                self.buffer.push(byte);
                Ok(None)
            }
        }
    }

    fn abort(&mut self) {
        self.filling = false;
        self.buffer.clear();
    }
}
