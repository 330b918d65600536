use tracing::{debug, error, info, trace};

use super::error::Error;
use super::nst_fsm::Fsm;
use super::nst_gpio::{DigitalInput, DigitalOutput, GpioPort};
use super::nst_radio::{setup_radio, JobTag, RadioEvent, RadioTransport};
use super::nst_timing::{
    adjust_for_drift, clock_error_from_percent, elapsed, half_symbol, osticks2us, us2osticks, us2osticks_round, OsTime, WindowTiming, RX_RAMPUP_US,
};
use super::{TestContext, TestParameters};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RwState {
    Init,
    InitWindow,
    WaitForTrigger,
    WaitForWindow,
    RxWindow,
    RxEval,
    Final,
}

/// Check the sweep parameters before touching the radio.
pub fn validate_window_params(p: &TestParameters) -> Result<(), Error> {
    if p.window_start <= 0 || p.window_stop <= 0 {
        return Err(Error::Precondition("Window.Start and Window.Stop must be positive"));
    }
    if p.window_step == 0 {
        return Err(Error::Precondition("Window.Step must not be zero"));
    }
    if p.rx_dig_in < 0 {
        return Err(Error::Precondition("please set param RxDigIn"));
    }
    if p.rx_count == 0 {
        return Err(Error::Precondition("RxCount must be at least 1"));
    }
    Ok(())
}

/// Number of offsets visited by a sweep.
pub fn window_count(start: i32, stop: i32, step: i32) -> u32 {
    if step == 0 || (step > 0 && start > stop) || (step < 0 && start < stop) {
        return 0;
    }
    ((stop as i64 - start as i64) / step as i64 + 1) as u32
}

/* the sweep is over once the offset moves past stop in the step direction */
fn past_stop(window: i32, stop: i32, step: i32) -> bool {
    if step > 0 {
        window > stop
    } else {
        window < stop
    }
}

/// Receive window sweep: for each offset from Window.Start to Window.Stop,
/// wait for RxCount trigger edges and open the receiver that long after each.
#[derive(Debug)]
pub struct RwTest {
    fsm: Fsm<RwState>,
    running: bool,
    started: bool,
    trigger: DigitalInput,
    rx_out: DigitalOutput,
    window: i32,
    timing: WindowTiming,
    t_edge: OsTime,
    t_rx: OsTime,
    rx_complete: bool,
    rx_hit: bool,
}

impl Default for RwTest {
    fn default() -> Self {
        Self::new()
    }
}

impl RwTest {
    pub fn new() -> Self {
        Self {
            fsm: Fsm::new("RwTest", RwState::Init),
            running: false,
            started: false,
            trigger: DigitalInput::new(),
            rx_out: DigitalOutput::new(),
            window: 0,
            timing: WindowTiming { offset: 0, rx_syms: 0 },
            t_edge: 0,
            t_rx: 0,
            rx_complete: false,
            rx_hit: false,
        }
    }

    pub fn state(&self) -> RwState {
        self.fsm.state()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /* current window offset in us */
    pub fn window(&self) -> i32 {
        self.window
    }

    pub fn timing(&self) -> WindowTiming {
        self.timing
    }

    /// Returns true once the sweep has finished.
    pub fn poll<R: RadioTransport, G: GpioPort>(&mut self, ctx: &mut TestContext<R, G>, entry: bool) -> bool {
        if entry {
            self.fsm.reset(RwState::Init);
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

    fn fsm_dispatch<R: RadioTransport, G: GpioPort>(&mut self, ctx: &mut TestContext<R, G>, state: RwState, entry: bool) -> Option<RwState> {
        if ctx.stop_test && state != RwState::Final {
            if state == RwState::RxWindow {
                ctx.radio.clear_callback();
                ctx.radio.reset();
                self.rx_out.off(&mut ctx.gpio);
            }
            return Some(RwState::Final);
        }

        match state {
            RwState::Init => {
                self.started = false;
                if let Err(e) = validate_window_params(&ctx.params) {
                    error!(e=%e, "** rx window test not started **");
                    return Some(RwState::Final);
                }

                if let Err(e) = setup_radio(&mut ctx.radio, &ctx.params) {
                    ctx.radio_fault(e);
                    return Some(RwState::Final);
                }
                self.trigger.set_input(&mut ctx.gpio, ctx.params.rx_dig_in, true);
                self.rx_out.set_output(&mut ctx.gpio, ctx.params.rx_dig_out, true);
                self.window = ctx.params.window_start;
                self.started = true;

                info!(
                    "Start RX Window test: {} .. {} us step {} us, {} per window, trigger pin {}",
                    ctx.params.window_start, ctx.params.window_stop, ctx.params.window_step, ctx.params.rx_count, ctx.params.rx_dig_in
                );
                Some(RwState::InitWindow)
            }

            RwState::InitWindow => {
                let hsym = half_symbol(ctx.params.spreading_factor, ctx.params.bandwidth);
                let delay = us2osticks_round(self.window as i64);
                let clock_error = clock_error_from_percent(ctx.params.clock_error);
                self.timing = adjust_for_drift(delay, hsym, ctx.params.rx_syms, clock_error);
                info!(
                    "window {} us: rx at +{} us, {} syms",
                    self.window,
                    osticks2us(self.timing.offset),
                    self.timing.rx_syms
                );
                Some(RwState::WaitForTrigger)
            }

            RwState::WaitForTrigger => {
                let now = ctx.radio.now();
                let t = self.trigger.poll(&mut ctx.gpio, now)?;
                self.t_edge = t;
                Some(RwState::WaitForWindow)
            }

            RwState::WaitForWindow => {
                if entry {
                    self.t_rx = self.t_edge.wrapping_add(self.timing.offset);
                    trace!(edge = self.t_edge, rx = self.t_rx, "waiting for window");
                }
                if elapsed(self.t_rx, ctx.radio.now()) <= us2osticks(RX_RAMPUP_US) {
                    Some(RwState::RxWindow)
                } else {
                    None
                }
            }

            RwState::RxWindow => {
                if entry {
                    self.rx_complete = false;
                    self.rx_hit = false;
                    self.rx_out.on(&mut ctx.gpio);
                    if let Err(e) = ctx.radio.receive_at(self.t_rx, self.timing.rx_syms, JobTag::RxWindow) {
                        self.rx_out.off(&mut ctx.gpio);
                        ctx.radio_fault(e);
                        return Some(RwState::Final);
                    }
                }
                if self.rx_complete {
                    Some(RwState::RxEval)
                } else {
                    None
                }
            }

            RwState::RxEval => {
                let outcome = &mut ctx.outcome;
                outcome.window_tries += 1;
                if self.rx_hit {
                    outcome.window_hits += 1;
                }
                debug!(window = self.window, hit = self.rx_hit, "rx window sample");

                if outcome.window_tries < ctx.params.rx_count {
                    return Some(RwState::WaitForTrigger);
                }

                info!("window {} us: {}/{}", self.window, outcome.window_hits, outcome.window_tries);
                outcome.fold_window();

                match self.window.checked_add(ctx.params.window_step) {
                    Some(w) if !past_stop(w, ctx.params.window_stop, ctx.params.window_step) => {
                        self.window = w;
                        Some(RwState::InitWindow)
                    }
                    _ => Some(RwState::Final),
                }
            }

            RwState::Final => {
                if entry {
                    ctx.outcome.fold_window();
                    self.trigger.release();
                    self.rx_out.release(&mut ctx.gpio);
                    if self.started {
                        info!("End RX Window test: {}/{}", ctx.outcome.total_hits, ctx.outcome.total_tries);
                    }
                    self.running = false;
                }
                None
            }
        }
    }

    pub fn on_radio_event<R: RadioTransport, G: GpioPort>(&mut self, ctx: &mut TestContext<R, G>, ev: &RadioEvent) {
        if let RadioEvent::RxComplete { job: JobTag::RxWindow, len, time } = ev {
            if self.fsm.state() != RwState::RxWindow {
                debug!("stale rx window completion ignored");
                return;
            }
            trace!(time, len, "rx window complete");
            self.rx_complete = true;
            self.rx_hit = *len > 0;
            self.rx_out.off(&mut ctx.gpio);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_windows_in_either_direction() {
        assert_eq!(window_count(990_000, 1_010_000, 1_000), 21);
        assert_eq!(window_count(990_000, 1_100_000, 110_000), 2);
        assert_eq!(window_count(1_010_000, 990_000, -10_000), 3);
        assert_eq!(window_count(1_000, 1_000, 5), 1);
        assert_eq!(window_count(2_000, 1_000, 5), 0);
        assert_eq!(window_count(1_000, 2_000, 0), 0);
    }

    #[test]
    fn sweep_stops_past_stop() {
        assert!(past_stop(1_011_000, 1_010_000, 1_000));
        assert!(!past_stop(1_010_000, 1_010_000, 1_000));
        assert!(past_stop(989_000, 990_000, -1_000));
        assert!(!past_stop(990_000, 990_000, -1_000));
    }

    #[test]
    fn validation() {
        let mut p = TestParameters { rx_dig_in: 2, ..TestParameters::default() };
        assert_eq!(validate_window_params(&p), Ok(()));

        p.window_step = 0;
        assert!(validate_window_params(&p).is_err());
        p.window_step = -1000;
        assert_eq!(validate_window_params(&p), Ok(()));

        p.window_start = 0;
        assert!(validate_window_params(&p).is_err());
        p.window_start = 990_000;

        p.rx_count = 0;
        assert!(validate_window_params(&p).is_err());
        p.rx_count = 1;

        p.rx_dig_in = -1;
        assert!(validate_window_params(&p).is_err());
    }
}
