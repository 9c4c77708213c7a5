//! Fujinami entrypoint.
//!
//! Hosts the two-stage pipeline behind the interfaces the platform
//! collaborators use: key events go in through [`Keyboard::send_event`],
//! synthesized output comes out through a [`KeySink`]. The OS capture hook
//! and the uinput/SendInput emitter are external; this binary stands a
//! line-oriented replay driver and a tracing-backed sink in their place, so
//! a configuration can be exercised end to end (`press 36`, `release 36`,
//! `quit`). ScrollLock toggles passthrough, which bypasses the engines
//! entirely.

use std::io::BufRead;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use core_events::InputEvent;
use core_keys::keycode::KEY_SCROLLLOCK;
use core_keys::{to_key, to_keycode};
use core_layout::KeySink;
use core_pipeline::Keyboard;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "fujinami", version, about = "Userspace keyboard remapper")]
struct Args {
    /// Path to the configuration file.
    #[arg(long = "config", default_value = "fujinami.toml")]
    config: PathBuf,
    /// Directory for log files; logs go to stderr when omitted.
    #[arg(long = "log-dir")]
    log_dir: Option<PathBuf>,
}

/// Emission backend that narrates synthesized events. A production host
/// replaces this with the platform emitter.
struct TraceSink {
    label: &'static str,
}

impl KeySink for TraceSink {
    fn key_press(&mut self, code: u16) {
        info!(target: "emit", sink = self.label, code, "key press");
    }
    fn key_repeat(&mut self, code: u16) {
        info!(target: "emit", sink = self.label, code, "key repeat");
    }
    fn key_release(&mut self, code: u16) {
        info!(target: "emit", sink = self.label, code, "key release");
    }
    fn char_press(&mut self, ch: char) {
        info!(target: "emit", sink = self.label, %ch, "char press");
    }
    fn char_release(&mut self, ch: char) {
        info!(target: "emit", sink = self.label, %ch, "char release");
    }
}

/// Keep the appender guard alive for the process lifetime so buffered log
/// lines flush on exit.
fn init_logging(log_dir: Option<&PathBuf>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "fujinami.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            None
        }
    }
}

enum Line {
    Press(u16),
    Release(u16),
    Quit,
}

fn parse_line(line: &str) -> Option<Line> {
    let mut parts = line.split_whitespace();
    let verb = parts.next()?;
    match verb {
        "quit" | "exit" => Some(Line::Quit),
        "press" | "p" | "release" | "r" => {
            let code: u16 = parts.next()?.parse().ok()?;
            if matches!(verb, "press" | "p") {
                Some(Line::Press(code))
            } else {
                Some(Line::Release(code))
            }
        }
        _ => None,
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = init_logging(args.log_dir.as_ref());

    // A broken config leaves the host in passthrough rather than eating
    // keystrokes with no mappings.
    let config = match core_config::load(&args.config) {
        Ok(config) => Some(config),
        Err(err) => {
            warn!(
                target: "host",
                error = %err,
                path = %args.config.display(),
                "failed to load config, staying in passthrough"
            );
            None
        }
    };

    let mut keyboard = Keyboard::open(Box::new(TraceSink { label: "mapped" }))?;
    let mut passthrough = config.is_none();
    if let Some(config) = config {
        keyboard.send_event(InputEvent::Control(Some(config)));
    }
    let mut raw_sink = TraceSink { label: "raw" };

    info!(target: "host", passthrough, "ready");

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let Some(parsed) = parse_line(&line) else {
            warn!(target: "host", input = %line, "unrecognized input");
            continue;
        };
        match parsed {
            Line::Quit => break,
            Line::Press(code) => {
                if passthrough {
                    raw_sink.key_press(code);
                } else if !send_key(&keyboard, code, true) {
                    warn!(target: "host", "queue is closed");
                }
            }
            Line::Release(code) => {
                if code == KEY_SCROLLLOCK {
                    passthrough = !passthrough;
                    info!(target: "host", passthrough, "passthrough toggled");
                    continue;
                }
                if passthrough {
                    raw_sink.key_release(code);
                } else if !send_key(&keyboard, code, false) {
                    warn!(target: "host", "queue is closed");
                }
            }
        }
    }

    keyboard.close();
    Ok(())
}

fn send_key(keyboard: &Keyboard, code: u16, press: bool) -> bool {
    let key = to_key(code);
    if key.is_unknown() {
        warn!(target: "host", code, "unknown key code dropped");
        return true;
    }
    // Round-trip through the key table, as the capture hook would.
    debug_assert_eq!(to_keycode(key), code);
    let time = Instant::now();
    let event = if press {
        InputEvent::KeyPress { time, key }
    } else {
        InputEvent::KeyRelease { time, key }
    };
    keyboard.send_event(event)
}
