use defmt::warn;
use embassy_executor::task;
use embassy_stm32::peripherals::{DMA1_CH1, DMA1_CH3, USART3};
use embassy_stm32::usart::{Error as UartError, UartRx, UartTx};

use ikarus_fc::hal::FrameSink;
use ikarus_fc::{Dispatcher, LinkReceiver, LinkTransmitter, RxRing};

use crate::tasks::sensor_task::CalibrationTrigger;

/// Host link UART receive: DMA reads until the line goes idle, bytes go into the ring.
#[task]
pub async fn link_rx_task(mut rx: UartRx<'static, USART3, DMA1_CH1>, ring: &'static RxRing) {
    let mut buf = [0u8; 128];
    loop {
        match rx.read_until_idle(&mut buf).await {
            Ok(n) => ring.push(&buf[..n]),
            Err(e) => warn!("link rx error: {}", e),
        }
    }
}

/// Parses the ring and dispatches each frame.
#[task]
pub async fn link_task(
    ring: &'static RxRing,
    mut dispatcher: Dispatcher<'static, CalibrationTrigger>,
) {
    let mut receiver = LinkReceiver::new();
    let mut buf = [0u8; 64];
    loop {
        let n = ring.read(&mut buf).await;
        receiver.push_bytes(&buf[..n], |received| {
            if let Err(e) = dispatcher.handle(received) {
                warn!("reply not sent: {}", e);
            }
        });
    }
}

struct UartSink {
    tx: UartTx<'static, USART3, DMA1_CH3>,
}

impl FrameSink for UartSink {
    type Error = UartError;

    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), UartError> {
        self.tx.write(frame).await
    }
}

/// Drains the transmit queue, one frame per DMA transfer.
#[task]
pub async fn link_tx_task(tx: UartTx<'static, USART3, DMA1_CH3>, queue: &'static LinkTransmitter) {
    let mut sink = UartSink { tx };
    loop {
        if let Err(e) = queue.pump_one(&mut sink).await {
            warn!("link tx error: {}", e);
        }
    }
}
