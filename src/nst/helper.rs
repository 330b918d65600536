use std::time::Duration;

/* settle time after a transport reset before the next command */
pub const RADIO_RESET_SETTLE_US: u64 = 500;

pub fn wait_us(us: u64) {
    std::thread::sleep(Duration::from_micros(us));
}
