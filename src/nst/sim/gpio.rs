use std::collections::BTreeMap;

use crate::nst::nst_gpio::{GpioPort, PinMode};

use super::{push_capped, LOG_LIMIT};

/// In-memory pin bank. Inputs read whatever level was last driven, either by
/// the code under test or from outside via `set_level`.
#[derive(Debug, Clone)]
pub struct SimGpio {
    levels: BTreeMap<u8, bool>,
    modes: BTreeMap<u8, PinMode>,
    writes: Vec<(u8, bool)>,
    log_limit: usize,
}

impl Default for SimGpio {
    fn default() -> Self {
        Self::new()
    }
}

impl SimGpio {
    pub fn new() -> Self {
        Self { levels: BTreeMap::new(), modes: BTreeMap::new(), writes: Vec::new(), log_limit: LOG_LIMIT }
    }

    /* entries kept in the write log; 0 disables recording */
    pub fn with_log_limit(mut self, limit: usize) -> Self {
        self.log_limit = limit;
        self
    }

    /* drive a pin from outside */
    pub fn set_level(&mut self, pin: u8, high: bool) {
        self.levels.insert(pin, high);
    }

    pub fn level(&self, pin: u8) -> bool {
        self.levels.get(&pin).copied().unwrap_or(false)
    }

    pub fn mode(&self, pin: u8) -> Option<PinMode> {
        self.modes.get(&pin).copied()
    }

    /* most recent digital_write calls, in order */
    pub fn writes(&self) -> &[(u8, bool)] {
        &self.writes
    }

    pub fn clear_writes(&mut self) {
        self.writes.clear();
    }
}

impl GpioPort for SimGpio {
    fn pin_mode(&mut self, pin: u8, mode: PinMode) {
        self.modes.insert(pin, mode);
    }

    fn digital_write(&mut self, pin: u8, high: bool) {
        self.levels.insert(pin, high);
        push_capped(&mut self.writes, self.log_limit, (pin, high));
    }

    fn digital_read(&mut self, pin: u8) -> bool {
        self.level(pin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_log_is_bounded() {
        let mut gpio = SimGpio::new().with_log_limit(6);
        for i in 0..50 {
            gpio.digital_write(3, i % 2 == 0);
        }
        assert!(gpio.writes().len() <= 6);
        assert_eq!(gpio.writes().last(), Some(&(3, false)));
        assert!(!gpio.level(3));
    }
}
