use std::io::Write;

use anyhow::Result;
use tracing::debug;

use super::error::Error;
use super::nst_gpio::GpioPort;
use super::nst_params::{ParamStore, PARAM_INFO};
use super::nst_radio::RadioTransport;
use super::{Command, Nst, NstTest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Success,
    Busy,
    InvalidParameter,
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CommandStatus::Success => "OK",
            CommandStatus::Busy => "busy",
            CommandStatus::InvalidParameter => "invalid parameter",
        };
        write!(f, "{}", s)
    }
}

/// Parse and execute one console line, writing replies to `out`.
pub fn dispatch<R: RadioTransport, G: GpioPort, W: Write>(nst: &mut Nst<R, G>, line: &str, out: &mut W) -> Result<CommandStatus> {
    let argv: Vec<&str> = line.split_whitespace().collect();
    let Some((cmd, args)) = argv.split_first() else {
        return Ok(CommandStatus::Success);
    };
    debug!("command: {:?}", argv);

    let start = |nst: &mut Nst<R, G>, c: Command| -> CommandStatus {
        match nst.ev_send_command(c) {
            Ok(()) => CommandStatus::Success,
            Err(_) => CommandStatus::Busy,
        }
    };

    let status = match (cmd.to_ascii_lowercase().as_str(), args.len()) {
        ("tx", 0) => start(nst, Command::StartTx),
        ("rx", 0) => start(nst, Command::StartRx),
        ("rw", 0) => start(nst, Command::StartRxWindow),
        ("tw", 0) => start(nst, Command::StartTxWindow),
        ("count", 0) => {
            nst.ev_stop_test();
            writeln!(out, "RxCount: {}", nst.get_rx_count())?;
            CommandStatus::Success
        }
        ("q", 0) => {
            nst.ev_stop_test();
            CommandStatus::Success
        }
        ("log", 0) => {
            for node in nst.events_mut().drain() {
                writeln!(out, "{}", node)?;
            }
            CommandStatus::Success
        }
        ("param", _) => param(nst, args, out)?,
        _ => CommandStatus::InvalidParameter,
    };
    Ok(status)
}

fn param<R: RadioTransport, G: GpioPort, W: Write>(nst: &mut Nst<R, G>, args: &[&str], out: &mut W) -> Result<CommandStatus> {
    match args {
        [] => {
            for p in PARAM_INFO.iter() {
                writeln!(out, "{}: {}", p.name, nst.params().get_param_by_key(p.key))?;
            }
            Ok(CommandStatus::Success)
        }
        [arg] if arg.eq_ignore_ascii_case("help") || arg.starts_with('?') => {
            for p in PARAM_INFO.iter() {
                writeln!(out, "{}: {}", p.name, p.help)?;
            }
            Ok(CommandStatus::Success)
        }
        [key] => match nst.get_param(key) {
            Ok(value) => {
                writeln!(out, "{}", value)?;
                Ok(CommandStatus::Success)
            }
            Err(_) => Ok(CommandStatus::InvalidParameter),
        },
        [key, value] => match nst.set_param(key, value) {
            Ok(()) => Ok(CommandStatus::Success),
            Err(Error::UnknownKey(_)) | Err(Error::InvalidValue { .. }) => Ok(CommandStatus::InvalidParameter),
            Err(_) => Ok(CommandStatus::Busy),
        },
        _ => Ok(CommandStatus::InvalidParameter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nst::sim::{SimGpio, SimRadio};
    use crate::nst::{State, TestParameters};

    fn run(nst: &mut Nst<SimRadio, SimGpio>, line: &str) -> (CommandStatus, String) {
        let mut out = Vec::new();
        let status = dispatch(nst, line, &mut out).unwrap();
        (status, String::from_utf8(out).unwrap())
    }

    fn controller() -> Nst<SimRadio, SimGpio> {
        let mut nst = Nst::new(SimRadio::new(), SimGpio::new(), TestParameters::default());
        nst.begin();
        nst
    }

    #[test]
    fn param_get_and_set() {
        let mut nst = controller();
        assert_eq!(run(&mut nst, "param rxtimeout"), (CommandStatus::Success, "5000\n".to_string()));
        assert_eq!(run(&mut nst, "param RxTimeout 100").0, CommandStatus::Success);
        assert_eq!(run(&mut nst, "param RxTimeout").1, "100\n");
        assert_eq!(run(&mut nst, "param RxTimeout abc").0, CommandStatus::InvalidParameter);
        assert_eq!(run(&mut nst, "param Bogus").0, CommandStatus::InvalidParameter);
        assert_eq!(run(&mut nst, "param a b c").0, CommandStatus::InvalidParameter);
    }

    #[test]
    fn param_listing() {
        let mut nst = controller();
        let (status, text) = run(&mut nst, "param");
        assert_eq!(status, CommandStatus::Success);
        assert_eq!(text.lines().count(), PARAM_INFO.len());
        assert!(text.starts_with("Bandwidth: 125\n"));
        assert!(text.contains("ClockError: 0.0%\n"));

        let (_, help) = run(&mut nst, "param ?");
        assert!(help.lines().all(|l| l.contains(": ")));
        assert_eq!(help.lines().count(), PARAM_INFO.len());
        assert!(help.starts_with("Bandwidth: 125, 250, or 500 (kHz)\n"));
        assert_eq!(run(&mut nst, "param HELP").1, help);
        assert_eq!(run(&mut nst, "param ?keys").1, help);
    }

    #[test]
    fn start_and_busy() {
        let mut nst = controller();
        run(&mut nst, "param TxTestCount 0");
        assert_eq!(run(&mut nst, "tx").0, CommandStatus::Success);
        assert_eq!(nst.state(), State::TxTest);
        assert_eq!(run(&mut nst, "rx").0, CommandStatus::Busy);
        assert_eq!(run(&mut nst, "q").0, CommandStatus::Success);
        assert_eq!(nst.state(), State::Idle);
    }

    #[test]
    fn count_stops_and_reports() {
        let mut nst = controller();
        run(&mut nst, "param RxTimeout 0");
        run(&mut nst, "rx");
        assert_eq!(nst.state(), State::RxTest);
        assert_eq!(run(&mut nst, "count"), (CommandStatus::Success, "RxCount: 0\n".to_string()));
        assert_eq!(nst.state(), State::Idle);
    }

    #[test]
    fn unknown_and_extra_args() {
        let mut nst = controller();
        assert_eq!(run(&mut nst, "frobnicate").0, CommandStatus::InvalidParameter);
        assert_eq!(run(&mut nst, "tx now").0, CommandStatus::InvalidParameter);
        assert_eq!(run(&mut nst, "   ").0, CommandStatus::Success);
        assert_eq!(nst.state(), State::Idle);
    }

    #[test]
    fn log_drains_events() {
        let mut nst = controller();
        run(&mut nst, "param TxTestCount 1");
        run(&mut nst, "param TxInterval 1");
        run(&mut nst, "tx");
        for _ in 0..5000 {
            nst.radio_mut().advance(1);
            nst.poll();
        }
        assert_eq!(nst.state(), State::Idle);
        let (_, text) = run(&mut nst, "log");
        assert!(text.contains("TXCOMPLETE(TxTest)"));
        assert_eq!(run(&mut nst, "log").1, "");
    }
}
