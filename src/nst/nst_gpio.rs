use tracing::trace;

use super::nst_timing::OsTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    Input,
    Output,
    Float,
}

/// Host digital I/O.
pub trait GpioPort {
    fn pin_mode(&mut self, pin: u8, mode: PinMode);
    fn digital_write(&mut self, pin: u8, high: bool);
    fn digital_read(&mut self, pin: u8) -> bool;
}

fn pin_of(pin: i8) -> Option<u8> {
    u8::try_from(pin).ok()
}

/// Edge detector on an optional input pin. A pin below zero is unassigned.
#[derive(Debug, Clone)]
pub struct DigitalInput {
    pin: i8,
    active_high: bool,
    last: bool,
}

impl Default for DigitalInput {
    fn default() -> Self {
        Self::new()
    }
}

impl DigitalInput {
    pub const fn new() -> Self {
        Self { pin: -1, active_high: true, last: false }
    }

    pub fn set_input<G: GpioPort>(&mut self, gpio: &mut G, pin: i8, active_high: bool) {
        self.pin = pin;
        self.active_high = active_high;
        self.last = false;
        if let Some(p) = pin_of(pin) {
            gpio.pin_mode(p, PinMode::Input);
            /* a level already active at setup is not an edge */
            self.last = gpio.digital_read(p) == active_high;
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.pin >= 0
    }

    pub fn pin(&self) -> i8 {
        self.pin
    }

    /// Sample the pin; returns the timestamp of a transition into the active level.
    pub fn poll<G: GpioPort>(&mut self, gpio: &mut G, now: OsTime) -> Option<OsTime> {
        let p = pin_of(self.pin)?;
        let active = gpio.digital_read(p) == self.active_high;
        let edge = active && !self.last;
        self.last = active;
        if edge {
            trace!(pin = p, now, "trigger edge");
            Some(now)
        } else {
            None
        }
    }

    pub fn release(&mut self) {
        self.pin = -1;
        self.last = false;
    }
}

/// Optional output pin. All operations are no-ops while unassigned.
#[derive(Debug, Clone)]
pub struct DigitalOutput {
    pin: i8,
    active_high: bool,
    asserted: bool,
}

impl Default for DigitalOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl DigitalOutput {
    pub const fn new() -> Self {
        Self { pin: -1, active_high: true, asserted: false }
    }

    /* rebinding deasserts and floats the previous pin */
    pub fn set_output<G: GpioPort>(&mut self, gpio: &mut G, pin: i8, active_high: bool) {
        if let Some(old) = pin_of(self.pin) {
            if self.pin != pin {
                gpio.digital_write(old, !self.active_high);
                gpio.pin_mode(old, PinMode::Float);
            }
        }

        self.pin = pin;
        self.active_high = active_high;
        self.asserted = false;
        if let Some(p) = pin_of(pin) {
            gpio.pin_mode(p, PinMode::Output);
            gpio.digital_write(p, !active_high);
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.pin >= 0
    }

    pub fn is_asserted(&self) -> bool {
        self.asserted
    }

    pub fn on<G: GpioPort>(&mut self, gpio: &mut G) {
        if let Some(p) = pin_of(self.pin) {
            gpio.digital_write(p, self.active_high);
            self.asserted = true;
        }
    }

    pub fn off<G: GpioPort>(&mut self, gpio: &mut G) {
        if let Some(p) = pin_of(self.pin) {
            gpio.digital_write(p, !self.active_high);
            self.asserted = false;
        }
    }

    pub fn release<G: GpioPort>(&mut self, gpio: &mut G) {
        if let Some(p) = pin_of(self.pin) {
            gpio.digital_write(p, !self.active_high);
            gpio.pin_mode(p, PinMode::Float);
        }
        self.pin = -1;
        self.asserted = false;
    }
}
