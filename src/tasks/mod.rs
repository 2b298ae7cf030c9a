pub mod control_task;
pub mod link_task;
pub mod sensor_task;
