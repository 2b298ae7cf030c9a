use defmt::error;
use embassy_executor::task;
use embassy_time::Ticker;

use ikarus_fc::config::CONTROL_PERIOD;
use ikarus_fc::state::{AttitudeEstimate, FirmwareState, SensorSample, Shared};
use ikarus_fc::Supervisor;

use crate::drivers::dshot::BitBangDshot;

pub type FlightSupervisor =
    Supervisor<'static, BitBangDshot, Shared<AttitudeEstimate>, Shared<SensorSample>>;

/// Supervisor loop, 40 Hz.
#[task]
pub async fn control_task(mut supervisor: FlightSupervisor) {
    let mut ticker = Ticker::every(CONTROL_PERIOD);
    let mut reported = false;

    loop {
        ticker.next().await;

        // ERROR is idle until the board is reset
        if supervisor.tick() == FirmwareState::Error && !reported {
            error!("firmware in ERROR, motors held stopped");
            reported = true;
        }
    }
}
