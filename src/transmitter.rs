//! Outgoing side of the host link: a bounded frame queue drained by one sender.

use core::fmt::Write as _;
use core::sync::atomic::{AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use crate::config::{MAX_PAYLOAD, TX_QUEUE_DEPTH};
use crate::hal::FrameSink;
use crate::protocol::{Frame, Message, ProtocolError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkError {
    /// The queue held `TX_QUEUE_DEPTH` frames; this one was dropped.
    QueueFull,
    Protocol(ProtocolError),
}

impl From<ProtocolError> for LinkError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

impl core::fmt::Display for LinkError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::QueueFull => f.write_str("transmit queue full"),
            Self::Protocol(e) => write!(f, "{}", e),
        }
    }
}

pub struct LinkTransmitter {
    queue: Channel<CriticalSectionRawMutex, Frame, TX_QUEUE_DEPTH>,
    dropped: AtomicU32,
    sent: AtomicU32,
}

impl LinkTransmitter {
    pub const fn new() -> Self {
        Self {
            queue: Channel::new(),
            dropped: AtomicU32::new(0),
            sent: AtomicU32::new(0),
        }
    }

    /// Queue a frame without waiting.
    pub fn enqueue(&self, frame: Frame) -> Result<(), LinkError> {
        self.queue.try_send(frame).map_err(|_| {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!("tx queue full, frame type {=u8} dropped ({=u32} total)", frame[1], dropped);
            LinkError::QueueFull
        })
    }

    pub fn send(&self, msg: &Message<'_>) -> Result<(), LinkError> {
        self.enqueue(msg.to_frame()?)
    }

    /// Queue a REPLY frame carrying `text`.
    pub fn reply(&self, text: &str) -> Result<(), LinkError> {
        self.send(&Message::Reply(text))
    }

    /// Format and queue a REPLY frame.
    pub fn reply_fmt(&self, args: core::fmt::Arguments<'_>) -> Result<(), LinkError> {
        let mut text: heapless::String<MAX_PAYLOAD> = heapless::String::new();
        text.write_fmt(args)
            .map_err(|_| LinkError::Protocol(ProtocolError::PayloadTooLong(MAX_PAYLOAD + 1)))?;
        self.reply(&text)
    }

    /// Wait for the next queued frame.
    pub async fn next(&self) -> Frame {
        self.queue.receive().await
    }

    pub fn try_next(&self) -> Option<Frame> {
        self.queue.try_receive().ok()
    }

    /// Move one frame to `sink`, returning once the sink reports it sent.
    pub async fn pump_one<S: FrameSink>(&self, sink: &mut S) -> Result<(), S::Error> {
        let frame = self.next().await;
        sink.write_frame(&frame).await?;
        self.sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Frames lost to a full queue since boot.
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn sent(&self) -> u32 {
        self.sent.load(Ordering::Relaxed)
    }
}

impl Default for LinkTransmitter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::FRAME_LEN;
    use crate::protocol::decode;
    use embassy_futures::block_on;

    /// Text of a queued REPLY frame.
    pub(crate) fn reply_text(frame: &Frame) -> String {
        let raw = decode(frame).unwrap();
        match Message::parse(&raw).unwrap() {
            Message::Reply(text) => text.to_string(),
            other => panic!("not a reply: {:?}", other),
        }
    }

    /// Drain the queue into a list of frames.
    pub(crate) fn drain(tx: &LinkTransmitter) -> Vec<Frame> {
        core::iter::from_fn(|| tx.try_next()).collect()
    }

    #[derive(Default)]
    struct VecSink {
        written: Vec<Vec<u8>>,
    }

    impl FrameSink for VecSink {
        type Error = ();

        async fn write_frame(&mut self, frame: &[u8]) -> Result<(), ()> {
            self.written.push(frame.to_vec());
            Ok(())
        }
    }

    #[test]
    fn full_queue_reports_and_counts_drops() {
        let tx = LinkTransmitter::new();
        for _ in 0..TX_QUEUE_DEPTH {
            tx.send(&Message::Ping).unwrap();
        }
        assert_eq!(tx.send(&Message::Ping), Err(LinkError::QueueFull));
        assert_eq!(tx.reply("OK: armed"), Err(LinkError::QueueFull));
        assert_eq!(tx.dropped(), 2);
        assert_eq!(tx.pending(), TX_QUEUE_DEPTH);
    }

    #[test]
    fn frames_leave_in_order() {
        let tx = LinkTransmitter::new();
        tx.reply("first").unwrap();
        tx.reply_fmt(format_args!("ERR: {}", ProtocolError::InvalidStart))
            .unwrap();

        let frames = drain(&tx);
        assert_eq!(frames.len(), 2);
        assert_eq!(reply_text(&frames[0]), "first");
        assert_eq!(reply_text(&frames[1]), "ERR: invalid start");
    }

    #[test]
    fn pump_writes_whole_frames() {
        let tx = LinkTransmitter::new();
        let mut sink = VecSink::default();
        tx.send(&Message::Ping).unwrap();
        tx.send(&Message::Arming(true)).unwrap();

        block_on(tx.pump_one(&mut sink)).unwrap();
        block_on(tx.pump_one(&mut sink)).unwrap();

        assert_eq!(sink.written.len(), 2);
        assert!(sink.written.iter().all(|f| f.len() == FRAME_LEN));
        assert_eq!(tx.sent(), 2);
        assert_eq!(tx.pending(), 0);
    }

    #[test]
    fn oversized_reply_is_refused() {
        let tx = LinkTransmitter::new();
        let long = "x".repeat(MAX_PAYLOAD + 1);
        assert!(matches!(tx.reply(&long), Err(LinkError::Protocol(_))));
        assert_eq!(tx.pending(), 0);
        assert_eq!(tx.dropped(), 0);
    }
}
