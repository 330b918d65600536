use tracing::{debug, info, trace};

use super::helper::{wait_us, RADIO_RESET_SETTLE_US};
use super::nst_gpio::{DigitalOutput, GpioPort};
use super::nst_radio::{setup_radio, JobTag, RadioEvent, RadioTransport};
use super::nst_timing::ms2osticks;
use super::TestContext;

/// Continuous receive test, optionally bounded by RxTimeout.
#[derive(Debug, Default)]
pub struct RxTest {
    continuous: bool,
    timed_out: bool,
    receiving: bool,
    dig_out: DigitalOutput,
}

impl RxTest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true once the test has finished.
    pub fn poll<R: RadioTransport, G: GpioPort>(&mut self, ctx: &mut TestContext<R, G>, entry: bool) -> bool {
        if entry {
            self.start(ctx);
        }

        if ctx.stop_test {
            self.stop(ctx);
            info!("RX test stopped: received messages: {}", ctx.outcome.rx_count);
            return true;
        }

        if self.timed_out {
            self.stop(ctx);
            info!("RX test complete: received messages: {}", ctx.outcome.rx_count);
            return true;
        }

        if !self.receiving {
            self.dig_out.on(&mut ctx.gpio);
            match ctx.radio.receive_once(JobTag::RxTest) {
                Ok(()) => self.receiving = true,
                Err(e) => ctx.radio_fault(e),
            }
        }
        false
    }

    fn start<R: RadioTransport, G: GpioPort>(&mut self, ctx: &mut TestContext<R, G>) {
        let timeout = ms2osticks(ctx.params.rx_timeout);
        self.continuous = timeout == 0;
        self.timed_out = false;
        self.receiving = false;
        self.dig_out.set_output(&mut ctx.gpio, ctx.params.rx_dig_out, true);

        if self.continuous {
            info!("Start RX test: until stopped");
        } else {
            info!("Start RX test: {} ms", ctx.params.rx_timeout);
        }

        if let Err(e) = setup_radio(&mut ctx.radio, &ctx.params) {
            ctx.radio_fault(e);
            return;
        }
        if !self.continuous {
            let deadline = ctx.radio.now().wrapping_add(timeout);
            ctx.radio.set_timed_callback(deadline, JobTag::RxTimeout);
        }
    }

    fn stop<R: RadioTransport, G: GpioPort>(&mut self, ctx: &mut TestContext<R, G>) {
        ctx.radio.reset();
        ctx.radio.clear_callback();
        ctx.radio.clear_timed_callback(JobTag::RxTimeout);
        self.receiving = false;
        self.dig_out.release(&mut ctx.gpio);
    }

    pub fn on_radio_event<R: RadioTransport, G: GpioPort>(&mut self, ctx: &mut TestContext<R, G>, ev: &RadioEvent) {
        match ev {
            RadioEvent::RxComplete { job: JobTag::RxTest, len, time } => {
                if *len > 0 {
                    ctx.outcome.rx_count += 1;
                    trace!(time, len, ".");
                }
                self.receiving = false;
                self.dig_out.off(&mut ctx.gpio);
            }
            RadioEvent::Timer { job: JobTag::RxTimeout, .. } => {
                debug!("rx test timeout");
                ctx.radio.reset();
                wait_us(RADIO_RESET_SETTLE_US);
                ctx.radio.clear_callback();
                self.timed_out = true;
                self.receiving = false;
                self.dig_out.off(&mut ctx.gpio);
            }
            _ => {}
        }
    }
}
