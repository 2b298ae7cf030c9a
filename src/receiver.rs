//! Resynchronising frame parser for the host link, and the ring it reads from.

use core::sync::atomic::{AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::pipe::Pipe;

use crate::config::{FRAME_LEN, MAX_PAYLOAD, RX_RING_SIZE, START_BYTE};
use crate::protocol::{self, Frame, ProtocolError};

/// Byte ring between the UART producer and the parser.
pub struct RxRing {
    pipe: Pipe<CriticalSectionRawMutex, RX_RING_SIZE>,
    dropped: AtomicU32,
}

impl RxRing {
    pub const fn new() -> Self {
        Self {
            pipe: Pipe::new(),
            dropped: AtomicU32::new(0),
        }
    }

    /// Non-blocking; bytes that do not fit are dropped and counted.
    pub fn push(&self, mut bytes: &[u8]) {
        while !bytes.is_empty() {
            match self.pipe.try_write(bytes) {
                Ok(n) => bytes = &bytes[n..],
                Err(_) => {
                    warn!("rx ring full, dropped {=usize} bytes", bytes.len());
                    self.dropped.fetch_add(bytes.len() as u32, Ordering::Relaxed);
                    return;
                }
            }
        }
    }

    /// Wait for at least one byte.
    pub async fn read(&self, buf: &mut [u8]) -> usize {
        self.pipe.read(buf).await
    }

    pub fn try_read(&self, buf: &mut [u8]) -> usize {
        self.pipe.try_read(buf).unwrap_or(0)
    }

    /// Bytes lost to a full ring since boot.
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for RxRing {
    fn default() -> Self {
        Self::new()
    }
}

/// Turns a byte stream into validated frames.
///
/// Bytes are discarded until a start marker. From there exactly [`FRAME_LEN`] bytes are collected;
/// the declared length is only checked against [`MAX_PAYLOAD`]. A candidate that fails (bad length
/// or checksum) is not thrown away wholesale: the parser restarts at the next start marker inside
/// it, so a real frame hidden behind a stray `0xAA` is still found.
pub struct LinkReceiver {
    buffer: heapless::Vec<u8, FRAME_LEN>,
    frames: u32,
    rejected: u32,
}

impl LinkReceiver {
    pub fn new() -> Self {
        Self {
            buffer: heapless::Vec::new(),
            frames: 0,
            rejected: 0,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Number of frames handed out.
    pub fn frames(&self) -> u32 {
        self.frames
    }

    /// Number of candidates that failed validation.
    pub fn rejected(&self) -> u32 {
        self.rejected
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Feed one byte. Returns a frame, or the reason a candidate was dropped.
    pub fn push_byte(&mut self, b: u8) -> Option<Result<Frame, ProtocolError>> {
        if self.buffer.is_empty() {
            if b == START_BYTE {
                let _ = self.buffer.push(b);
            }
            return None;
        }

        if self.buffer.push(b).is_err() {
            // cannot happen while frames are completed at FRAME_LEN
            self.buffer.clear();
            return None;
        }

        if self.buffer.len() == 3 && self.buffer[2] as usize > MAX_PAYLOAD {
            let len = self.buffer[2];
            self.rejected += 1;
            self.resync();
            return Some(Err(ProtocolError::InvalidLength(len)));
        }

        if self.buffer.len() < FRAME_LEN {
            return None;
        }

        let mut frame = [0u8; FRAME_LEN];
        frame.copy_from_slice(&self.buffer);
        match protocol::decode(&frame) {
            Ok(_) => {
                self.buffer.clear();
                self.frames += 1;
                Some(Ok(frame))
            }
            Err(e) => {
                self.rejected += 1;
                self.resync();
                Some(Err(e))
            }
        }
    }

    /// Feed a chunk, calling `on_frame` for every frame or rejection in order.
    pub fn push_bytes(
        &mut self,
        data: &[u8],
        mut on_frame: impl FnMut(Result<Frame, ProtocolError>),
    ) {
        for &b in data {
            if let Some(res) = self.push_byte(b) {
                on_frame(res);
            }
        }
    }

    /// Drop the current start marker and restart at the next one in the buffer. Headers met on the
    /// way are checked again; bad ones are skipped silently.
    fn resync(&mut self) {
        loop {
            let next = self.buffer[1..].iter().position(|&b| b == START_BYTE);
            let Some(offset) = next else {
                self.buffer.clear();
                return;
            };
            let start = offset + 1;
            let len = self.buffer.len();
            self.buffer.copy_within(start..len, 0);
            self.buffer.truncate(len - start);

            if self.buffer.len() < 3 || self.buffer[2] as usize <= MAX_PAYLOAD {
                return;
            }
        }
    }
}

impl Default for LinkReceiver {
    fn default() -> Self {
        Self::new()
    }
}
