use tracing::{debug, error, info};

use super::error::Error;
use super::nst_fsm::Fsm;
use super::nst_gpio::{DigitalOutput, GpioPort};
use super::nst_radio::{setup_radio, JobTag, RadioEvent, RadioTransport};
use super::nst_timing::{elapsed, ms2osticks, us2osticks_round, OsTime};
use super::{TestContext, TestParameters};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TwState {
    Init,
    Pulse,
    Delay,
    Tx,
    PostTx,
    Final,
}

pub fn validate_tx_window_params(p: &TestParameters) -> Result<(), Error> {
    if p.tx_interval == 0 || p.tx_pulse_ms == 0 {
        return Err(Error::Precondition("please specify positive, non-zero param TxInterval and TxPulseMs"));
    }
    if p.tx_pulse_out < 0 {
        return Err(Error::Precondition("please set param TxPulseOut"));
    }
    Ok(())
}

/// Transmit window test: raise a trigger pulse, then transmit exactly
/// TxInterval after the rising edge. Pairs with the receive window sweep.
#[derive(Debug)]
pub struct TwTest {
    fsm: Fsm<TwState>,
    running: bool,
    count: u32,
    continuous: bool,
    t_delay: OsTime,
    t_pulse: OsTime,
    t_guard: OsTime,
    t_startup: OsTime,
    t_edge: OsTime,
    tx_complete: bool,
    frame: Vec<u8>,
    pulse_out: DigitalOutput,
    data_out: DigitalOutput,
}

impl Default for TwTest {
    fn default() -> Self {
        Self::new()
    }
}

impl TwTest {
    pub fn new() -> Self {
        Self {
            fsm: Fsm::new("TwTest", TwState::Init),
            running: false,
            count: 0,
            continuous: false,
            t_delay: 0,
            t_pulse: 0,
            t_guard: 0,
            t_startup: 0,
            t_edge: 0,
            tx_complete: false,
            frame: Vec::new(),
            pulse_out: DigitalOutput::new(),
            data_out: DigitalOutput::new(),
        }
    }

    pub fn state(&self) -> TwState {
        self.fsm.state()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /* time of the most recent trigger edge */
    pub fn edge(&self) -> OsTime {
        self.t_edge
    }

    /// Returns true once the test has finished.
    pub fn poll<R: RadioTransport, G: GpioPort>(&mut self, ctx: &mut TestContext<R, G>, entry: bool) -> bool {
        if entry {
            self.fsm.reset(TwState::Init);
            self.running = true;
        }
        loop {
            let (state, entry) = self.fsm.current();
            let next = self.fsm_dispatch(ctx, state, entry);
            if !self.fsm.advance(next) {
                break;
            }
        }
        !self.running
    }

    fn fsm_dispatch<R: RadioTransport, G: GpioPort>(&mut self, ctx: &mut TestContext<R, G>, state: TwState, entry: bool) -> Option<TwState> {
        if ctx.stop_test && state != TwState::Final {
            if state == TwState::Tx {
                ctx.radio.clear_callback();
                ctx.radio.reset();
            }
            return Some(TwState::Final);
        }

        match state {
            TwState::Init => {
                let p = &ctx.params;
                self.count = p.tx_test_count;
                self.continuous = self.count == 0;
                self.t_delay = ms2osticks(p.tx_interval);
                self.t_pulse = ms2osticks(p.tx_pulse_ms);
                self.t_guard = us2osticks_round(p.tx_guard_us as i64);
                self.t_startup = us2osticks_round(p.tx_start_us as i64);

                if let Err(e) = validate_tx_window_params(p) {
                    error!(e=%e, "** tx window test not started **");
                    return Some(TwState::Final);
                }

                self.pulse_out.set_output(&mut ctx.gpio, ctx.params.tx_pulse_out, true);
                self.data_out.set_output(&mut ctx.gpio, ctx.params.tx_dig_out, true);

                if let Err(e) = setup_radio(&mut ctx.radio, &ctx.params) {
                    ctx.radio_fault(e);
                    return Some(TwState::Final);
                }

                info!(
                    "Start TX Window test: tx {} ms after trigger, pulse {} ms on pin {}, {}",
                    ctx.params.tx_interval,
                    ctx.params.tx_pulse_ms,
                    ctx.params.tx_pulse_out,
                    if self.continuous { "continuous".to_string() } else { format!("{} messages", self.count) }
                );
                Some(TwState::Pulse)
            }

            TwState::Pulse => {
                if entry {
                    self.t_edge = ctx.radio.now();
                    self.pulse_out.on(&mut ctx.gpio);
                    ctx.radio.reset();
                    debug!(edge = self.t_edge, "trigger pulse");
                }
                if elapsed(ctx.radio.now(), self.t_edge) >= self.t_pulse {
                    self.pulse_out.off(&mut ctx.gpio);
                    Some(TwState::Delay)
                } else {
                    None
                }
            }

            TwState::Delay => {
                if entry {
                    self.frame.clear();
                    self.frame.extend_from_slice(&ctx.tx_data);
                }
                if elapsed(ctx.radio.now(), self.t_edge) >= self.t_delay - self.t_guard {
                    Some(TwState::Tx)
                } else {
                    None
                }
            }

            TwState::Tx => {
                if entry {
                    self.tx_complete = false;
                    let at = self.t_edge.wrapping_add(self.t_delay - self.t_startup);
                    self.data_out.on(&mut ctx.gpio);
                    if let Err(e) = ctx.radio.transmit_at(&self.frame, at, JobTag::TxWindow) {
                        self.data_out.off(&mut ctx.gpio);
                        ctx.radio_fault(e);
                        return Some(TwState::Final);
                    }
                }
                if !self.tx_complete {
                    return None;
                }
                if !self.continuous {
                    self.count -= 1;
                    if self.count == 0 {
                        return Some(TwState::Final);
                    }
                }
                Some(TwState::PostTx)
            }

            TwState::PostTx => {
                if entry {
                    self.t_edge = ctx.radio.now();
                }
                if elapsed(ctx.radio.now(), self.t_edge) >= self.t_pulse {
                    Some(TwState::Pulse)
                } else {
                    None
                }
            }

            TwState::Final => {
                if entry {
                    self.pulse_out.release(&mut ctx.gpio);
                    self.data_out.release(&mut ctx.gpio);
                    info!("End TX Window test: {} messages sent", ctx.outcome.tx_count);
                    self.running = false;
                }
                None
            }
        }
    }

    pub fn on_radio_event<R: RadioTransport, G: GpioPort>(&mut self, ctx: &mut TestContext<R, G>, ev: &RadioEvent) {
        if let RadioEvent::TxComplete { job: JobTag::TxWindow, time } = ev {
            if self.fsm.state() != TwState::Tx {
                debug!("stale tx window completion ignored");
                return;
            }
            debug!(time, "tx window complete");
            self.tx_complete = true;
            ctx.outcome.tx_count += 1;
            self.data_out.off(&mut ctx.gpio);
        }
    }
}
