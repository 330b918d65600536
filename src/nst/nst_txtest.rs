use tracing::{debug, info};

use super::helper::{wait_us, RADIO_RESET_SETTLE_US};
use super::nst_gpio::{DigitalOutput, GpioPort};
use super::nst_radio::{setup_radio, JobTag, RadioEvent, RadioTransport};
use super::nst_timing::{is_due, ms2osticks, OsTime};
use super::TestContext;

/// Periodic transmit test.
#[derive(Debug, Default)]
pub struct TxTest {
    count: u32,
    continuous: bool,
    idle: bool,
    next_tx: OsTime,
    interval: OsTime,
    dig_out: DigitalOutput,
}

impl TxTest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true once the test has finished.
    pub fn poll<R: RadioTransport, G: GpioPort>(&mut self, ctx: &mut TestContext<R, G>, entry: bool) -> bool {
        if entry {
            self.start(ctx);
        }

        if ctx.stop_test {
            if !self.idle {
                ctx.radio.clear_callback();
                ctx.radio.reset();
                self.idle = true;
            }
            self.dig_out.release(&mut ctx.gpio);
            info!("TX test stopped: {} messages sent", ctx.outcome.tx_count);
            return true;
        }

        if !self.idle {
            return false;
        }

        if !self.continuous && self.count == 0 {
            self.dig_out.release(&mut ctx.gpio);
            info!("TX test complete: {} messages sent", ctx.outcome.tx_count);
            return true;
        }

        if !is_due(ctx.radio.now(), self.next_tx) {
            return false;
        }

        ctx.radio.reset();
        wait_us(RADIO_RESET_SETTLE_US);

        debug!("<tx>");
        self.dig_out.on(&mut ctx.gpio);
        if let Err(e) = ctx.radio.transmit(&ctx.tx_data, JobTag::TxTest) {
            self.dig_out.off(&mut ctx.gpio);
            ctx.radio_fault(e);
            return false;
        }
        self.idle = false;
        if !self.continuous {
            self.count -= 1;
        }
        self.next_tx = self.next_tx.wrapping_add(self.interval);
        false
    }

    fn start<R: RadioTransport, G: GpioPort>(&mut self, ctx: &mut TestContext<R, G>) {
        self.count = ctx.params.tx_test_count;
        self.continuous = self.count == 0;
        self.idle = true;
        self.interval = ms2osticks(ctx.params.tx_interval);
        self.dig_out.set_output(&mut ctx.gpio, ctx.params.tx_dig_out, true);

        if self.continuous {
            info!("Start TX test: continuous, every {} ms", ctx.params.tx_interval);
        } else {
            info!("Start TX test: {} messages, every {} ms", self.count, ctx.params.tx_interval);
        }

        if let Err(e) = setup_radio(&mut ctx.radio, &ctx.params) {
            ctx.radio_fault(e);
        }
        self.next_tx = ctx.radio.now();
    }

    pub fn on_radio_event<R: RadioTransport, G: GpioPort>(&mut self, ctx: &mut TestContext<R, G>, ev: &RadioEvent) {
        if let RadioEvent::TxComplete { job: JobTag::TxTest, time } = ev {
            debug!(time, "<txcomplete>");
            self.idle = true;
            ctx.outcome.tx_count += 1;
            self.dig_out.off(&mut ctx.gpio);
        }
    }
}
