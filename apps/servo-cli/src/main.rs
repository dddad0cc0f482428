use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use serde_json::{json, Value};
use std::io::{BufRead, Write};
use tracing::{info, warn};

use servo_controller::{api, global, load_config_file, ControllerConfig, DeviceController};
use servo_link::{MockLink, ServoLink};

#[derive(Parser, Debug)]
#[command(
    name = "servo",
    version,
    about = "Serial servo board controller",
    disable_help_subcommand = true
)]
struct Cli {
    /// Use the in-process mock board instead of a serial port
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    mock: bool,

    /// Controller config file (YAML, or JSON by extension)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Serial port (overrides config and SERVO_PORT)
    #[arg(long, global = true)]
    port: Option<String>,

    /// Baud rate (overrides config and SERVO_BAUD)
    #[arg(long, global = true)]
    baud: Option<u32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List serial ports visible on this host
    Ports,
    /// Show whether the board is connected
    Status,
    /// Open the link and handshake with the board
    Connect {
        /// Number of attempts
        #[arg(long)]
        retries: Option<u32>,
        /// Delay between attempts in milliseconds
        #[arg(long)]
        retry_delay_ms: Option<u64>,
    },
    /// Move one servo
    Move {
        /// Servo pin (2-31)
        #[arg(long, allow_negative_numbers = true)]
        servo: i64,
        /// Angle in degrees (0-180)
        #[arg(long, allow_negative_numbers = true)]
        angle: i64,
    },
    /// Move every servo to the neutral angle
    Reset {
        /// Override the neutral angle
        #[arg(long, allow_negative_numbers = true)]
        angle: Option<i64>,
    },
    /// Print the diagnostics snapshot
    Diagnostics,
    /// Print Prometheus metrics for this process
    Metrics,
    /// Read commands from stdin against one long-lived connection
    Session,
}

fn main() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config_file(path)?,
        None => ControllerConfig::default(),
    };
    config.apply_overrides(env_port(), env_baud()?);
    config.apply_overrides(cli.port.clone(), cli.baud);
    if let Commands::Connect {
        retries,
        retry_delay_ms,
    } = &cli.command
    {
        if let Some(r) = retries {
            config.connect_retries = *r;
        }
        if let Some(d) = retry_delay_ms {
            config.retry_delay_ms = *d;
        }
    }
    config.validate()?;

    if cli.mock {
        if config.link.port.is_none() {
            config.link.port = Some("mock0".to_string());
        }
        let ctl = DeviceController::new(MockLink::new(), &config).with_sleeper(|_| {});
        run(&ctl, cli.command)
    } else {
        let ctl = global::serial(&config);
        let res = run(ctl, cli.command);
        global::SERIAL.shutdown();
        res
    }
}

fn setup_tracing() {
    // Best-effort; avoid panics if already set
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn env_port() -> Option<String> {
    std::env::var("SERVO_PORT").ok().filter(|p| !p.trim().is_empty())
}

fn env_baud() -> Result<Option<u32>> {
    match std::env::var("SERVO_BAUD") {
        Ok(v) => v
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("SERVO_BAUD is not a number: {v}")),
        Err(_) => Ok(None),
    }
}

fn run<L: ServoLink>(ctl: &DeviceController<L>, command: Commands) -> Result<()> {
    let resp = match command {
        Commands::Ports => {
            for p in ctl.enumerate_ports() {
                println!("{}\t{}\t{}", p.device, p.description, p.hardware_id);
            }
            return Ok(());
        }
        Commands::Metrics => {
            let text = ctl
                .metrics()
                .map(|m| m.encode_text())
                .unwrap_or_else(|| "metrics disabled".to_string());
            print!("{text}");
            return Ok(());
        }
        Commands::Session => return session(ctl),
        Commands::Status => api::status(ctl),
        Commands::Connect { .. } => api::connect(ctl, &json!({})),
        Commands::Move { servo, angle } => {
            api::move_actuator(ctl, &json!({ "address": servo, "angle": angle }))
        }
        Commands::Reset { angle } => match angle {
            Some(a) => api::reset_all(ctl, &json!({ "angle": a })),
            None => api::reset_all(ctl, &Value::Null),
        },
        Commands::Diagnostics => api::diagnostics(ctl),
    };
    print_response(&resp)?;
    if !resp.is_success() {
        anyhow::bail!("request failed with status {}", resp.code);
    }
    Ok(())
}

fn print_response(resp: &api::ApiResponse) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&resp.body)?);
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum SessionCmd {
    Move(i64, i64),
    Reset(Option<i64>),
    Status,
    Connect,
    Disconnect,
    Diagnostics,
    Ports,
    Quit,
}

fn parse_session_line(line: &str) -> Result<Option<SessionCmd>, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let mut int = |name: &str| -> Result<i64, String> {
        let w = words.next().ok_or_else(|| format!("missing {name}"))?;
        w.parse().map_err(|_| format!("{name} must be a number: {w}"))
    };
    let cmd = match verb {
        "move" | "m" => {
            let servo = int("servo")?;
            let angle = int("angle")?;
            SessionCmd::Move(servo, angle)
        }
        "reset" => match int("angle") {
            Ok(a) => SessionCmd::Reset(Some(a)),
            Err(e) if e.starts_with("missing") => SessionCmd::Reset(None),
            Err(e) => return Err(e),
        },
        "status" => SessionCmd::Status,
        "connect" => SessionCmd::Connect,
        "disconnect" => SessionCmd::Disconnect,
        "diag" | "diagnostics" => SessionCmd::Diagnostics,
        "ports" => SessionCmd::Ports,
        "quit" | "exit" => SessionCmd::Quit,
        other => return Err(format!("unknown command: {other}")),
    };
    Ok(Some(cmd))
}

fn session<L: ServoLink>(ctl: &DeviceController<L>) -> Result<()> {
    info!("session started; commands: move N A, reset [A], status, connect, disconnect, diag, ports, quit");
    let stdin = std::io::stdin();
    let mut out = std::io::stdout();
    for line in stdin.lock().lines() {
        let line = line.context("reading stdin")?;
        let resp = match parse_session_line(&line) {
            Ok(None) => continue,
            Ok(Some(SessionCmd::Quit)) => break,
            Ok(Some(SessionCmd::Move(servo, angle))) => {
                api::move_actuator(ctl, &json!({ "address": servo, "angle": angle }))
            }
            Ok(Some(SessionCmd::Reset(angle))) => match angle {
                Some(a) => api::reset_all(ctl, &json!({ "angle": a })),
                None => api::reset_all(ctl, &Value::Null),
            },
            Ok(Some(SessionCmd::Status)) => api::status(ctl),
            Ok(Some(SessionCmd::Connect)) => api::connect(ctl, &json!({})),
            Ok(Some(SessionCmd::Disconnect)) => api::disconnect(ctl),
            Ok(Some(SessionCmd::Diagnostics)) => api::diagnostics(ctl),
            Ok(Some(SessionCmd::Ports)) => {
                let ports = ctl.enumerate_ports();
                writeln!(out, "{}", serde_json::to_string(&ports)?)?;
                continue;
            }
            Err(e) => {
                warn!("{e}");
                writeln!(out, "{}", json!({ "status": "error", "message": e }))?;
                continue;
            }
        };
        writeln!(out, "{}", serde_json::to_string(&resp.body)?)?;
        out.flush()?;
    }
    ctl.disconnect()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_session_commands() {
        assert_eq!(parse_session_line("move 3 45"), Ok(Some(SessionCmd::Move(3, 45))));
        assert_eq!(parse_session_line("  m 31 -1 "), Ok(Some(SessionCmd::Move(31, -1))));
        assert_eq!(parse_session_line("reset"), Ok(Some(SessionCmd::Reset(None))));
        assert_eq!(parse_session_line("reset 10"), Ok(Some(SessionCmd::Reset(Some(10)))));
        assert_eq!(parse_session_line("diag"), Ok(Some(SessionCmd::Diagnostics)));
        assert_eq!(parse_session_line(""), Ok(None));
        assert_eq!(parse_session_line("exit"), Ok(Some(SessionCmd::Quit)));
    }

    #[test]
    fn rejects_bad_session_lines() {
        assert!(parse_session_line("move 3").is_err());
        assert!(parse_session_line("move x 3").is_err());
        assert!(parse_session_line("reset up").is_err());
        assert!(parse_session_line("fly").is_err());
    }

    #[test]
    fn cli_parses_move() {
        let cli = Cli::try_parse_from(["servo", "--mock", "move", "--servo", "4", "--angle", "120"])
            .unwrap();
        assert!(cli.mock);
        assert!(matches!(cli.command, Commands::Move { servo: 4, angle: 120 }));
    }

    #[test]
    fn mock_run_moves_and_resets() {
        let mut cfg = ControllerConfig::default();
        cfg.link.port = Some("mock0".into());
        let ctl = DeviceController::new(MockLink::new(), &cfg).with_sleeper(|_| {});
        run(&ctl, Commands::Move { servo: 2, angle: 90 }).unwrap();
        run(&ctl, Commands::Reset { angle: None }).unwrap();
        assert!(run(&ctl, Commands::Move { servo: 1, angle: 90 }).is_err());
    }
}
