#![no_std]
#![no_main]

mod board;
mod drivers;
mod tasks;

use defmt::{info, warn};
use embassy_executor::Spawner;
use embassy_stm32::dma::NoDma;
use embassy_stm32::gpio::{Level, Output, Pin, Speed};
use embassy_stm32::i2c::I2c;
use embassy_stm32::spi::{Config as SpiConfig, Spi};
use embassy_stm32::time::Hertz;
use embassy_stm32::usart::{Config as UsartConfig, Uart};
use embassy_stm32::{bind_interrupts, peripherals};
use embassy_time::{Duration, Timer};
use {defmt_rtt as _, panic_probe as _};

use ikarus_fc::state::{AttitudeEstimate, FirmwareState, SensorSample, Shared};
use ikarus_fc::{
    ControlLaw, ControlParams, Dispatcher, FlightState, LinkTransmitter, MotorOutput, Motors,
    RxRing, Supervisor, SupervisorConfig,
};

use crate::drivers::dshot::BitBangDshot;
use crate::drivers::icm42688::Icm42688;
use crate::tasks::control_task::control_task;
use crate::tasks::link_task::{link_rx_task, link_task, link_tx_task};
use crate::tasks::sensor_task::{sensor_task, CalibrationTrigger};

const LINK_BAUDRATE: u32 = 115_200;
const IMU_BIAS_SAMPLES: u16 = 100;

// ── Shared state ──────────────────────────────────────────────────────────────
static FLIGHT: FlightState = FlightState::new();
static MOTORS: Motors = Motors::new();
static ESTIMATE: Shared<AttitudeEstimate> = Shared::new(AttitudeEstimate::ZERO);
static SENSORS: Shared<SensorSample> = Shared::new(SensorSample::ZERO);

// ── Host link ─────────────────────────────────────────────────────────────────
static RX_RING: RxRing = RxRing::new();
static TX_QUEUE: LinkTransmitter = LinkTransmitter::new();

// ── Interrupt bindings ────────────────────────────────────────────────────────
bind_interrupts!(struct Irqs {
    I2C1_EV  => embassy_stm32::i2c::EventInterruptHandler<peripherals::I2C1>;
    I2C1_ER  => embassy_stm32::i2c::ErrorInterruptHandler<peripherals::I2C1>;
    USART3   => embassy_stm32::usart::InterruptHandler<peripherals::USART3>;
});

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let p = board::init();
    info!("ikarus-fc boot");

    // Motors: MOTOR1..4 pads, DShot300 bit-banged
    let dshot = BitBangDshot::new([
        p.PB0.degrade(),
        p.PB1.degrade(),
        p.PA3.degrade(),
        p.PA2.degrade(),
    ]);

    // Host link on USART3 (TX=PB10, RX=PB11)
    let mut link_config = UsartConfig::default();
    link_config.baudrate = LINK_BAUDRATE;
    let link_uart = Uart::new(
        p.USART3, p.PB11, p.PB10,
        Irqs,
        p.DMA1_CH3, p.DMA1_CH1,
        link_config,
    ).unwrap();
    let (link_tx, link_rx) = link_uart.split();

    // ICM-42688 on SPI1 @ 10 MHz (SCK=PA5, MOSI=PA7, MISO=PA6, CS=PB12)
    let mut spi_config = SpiConfig::default();
    spi_config.frequency = Hertz(10_000_000);
    let spi = Spi::new(p.SPI1, p.PA5, p.PA7, p.PA6, NoDma, NoDma, spi_config);
    let cs_gyro = Output::new(p.PB12.degrade(), Level::High, Speed::VeryHigh);
    let mut imu = Icm42688::new(spi, cs_gyro);

    // HMC5883 on I2C1 @ 400 kHz (SCL=PB8, SDA=PB9)
    let i2c = I2c::new(
        p.I2C1,
        p.PB8, p.PB9,
        Irqs,
        p.DMA1_CH7,
        p.DMA1_CH0,
        Hertz(400_000),
        Default::default(),
    );

    let mut led = Output::new(p.PC13, Level::High, Speed::Low);

    Timer::after(Duration::from_millis(100)).await;
    match imu.init().await {
        Ok(true) => {}
        Ok(false) => warn!("icm42688: unexpected WHO_AM_I"),
        Err(e) => warn!("icm42688 init failed: {}", e),
    }
    // vehicle must rest during the first second
    let bias = imu.estimate_bias(IMU_BIAS_SAMPLES).await;
    led.set_high();

    let supervisor = Supervisor::new(
        SupervisorConfig::default(),
        &FLIGHT,
        MotorOutput::new(&MOTORS, dshot),
        ControlLaw::new(ControlParams::default()),
        &ESTIMATE,
        &SENSORS,
        &TX_QUEUE,
    );
    let dispatcher = Dispatcher::new(&FLIGHT, &MOTORS, &TX_QUEUE, CalibrationTrigger);

    spawner.spawn(sensor_task(imu, bias, i2c, &SENSORS, &ESTIMATE)).unwrap();
    spawner.spawn(control_task(supervisor)).unwrap();
    spawner.spawn(link_rx_task(link_rx, &RX_RING)).unwrap();
    spawner.spawn(link_task(&RX_RING, dispatcher)).unwrap();
    spawner.spawn(link_tx_task(link_tx, &TX_QUEUE)).unwrap();

    // Heartbeat: slow blink unarmed, solid running, fast blink in ERROR
    loop {
        let period = match FLIGHT.firmware_state() {
            FirmwareState::Unarmed => 500,
            FirmwareState::Running => {
                led.set_low();
                Timer::after(Duration::from_millis(100)).await;
                continue;
            }
            FirmwareState::Error => 100,
        };
        led.toggle();
        Timer::after(Duration::from_millis(period)).await;
    }
}
