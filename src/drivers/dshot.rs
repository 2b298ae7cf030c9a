use cortex_m::asm;
use embassy_stm32::gpio::{AnyPin, Level, Output, Speed};

use ikarus_fc::config::{DSHOT_PERIOD, DSHOT_SLOTS, MOTOR_COUNT};
use ikarus_fc::dshot::DshotBuffer;
use ikarus_fc::hal::{BusFault, DshotBus};

use crate::board::SYSCLK_HZ;

/// DShot300 output on four GPIOs, timed with cycle-counted delays.
///
/// Each compare value of a [`DshotBuffer`] is scaled from timer ticks to CPU cycles, so the slot
/// durations match what a timer channel would produce.
pub struct BitBangDshot {
    pins: [Output<'static, AnyPin>; MOTOR_COUNT],
}

impl BitBangDshot {
    /// One DShot300 bit: 560 cycles at 168 MHz.
    const BIT_TOTAL_CYCLES: u32 = SYSCLK_HZ / 300_000;
    const FRAME_GAP_CYCLES: u32 = 5200;

    pub fn new(pins: [AnyPin; MOTOR_COUNT]) -> Self {
        Self {
            pins: pins.map(|pin| Output::new(pin, Level::Low, Speed::VeryHigh)),
        }
    }

    fn ticks_to_cycles(ticks: u32) -> u32 {
        ticks * Self::BIT_TOTAL_CYCLES / DSHOT_PERIOD
    }
}

impl DshotBus for BitBangDshot {
    fn start(&mut self, channel: usize, buffer: &DshotBuffer) -> Result<(), BusFault> {
        let pin = self.pins.get_mut(channel).ok_or(BusFault)?;

        // interrupts off for the ~60 µs frame, UART/I2C ISRs would stretch the bits
        critical_section::with(|_cs| {
            for &high in &buffer.slots()[..DSHOT_SLOTS - 1] {
                let high = Self::ticks_to_cycles(high);
                pin.set_high();
                asm::delay(high);
                pin.set_low();
                asm::delay(Self::BIT_TOTAL_CYCLES - high);
            }
            // reset slot
            pin.set_low();
            asm::delay(Self::FRAME_GAP_CYCLES);
        });
        Ok(())
    }
}
