//! Headless Session Runner
//!
//! Runs a command inside a terminal session without a display, then prints
//! what the screen shows once the command exits.

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use termsession::{Session, SessionCallback, SessionConfig};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logs host notifications at debug level
struct LoggingCallback;

impl SessionCallback for LoggingCallback {
    fn on_title_changed(&mut self, session: &Session) {
        tracing::debug!("title: {}", session.title());
    }

    fn on_session_finished(&mut self, session: &Session) {
        tracing::debug!("finished: {:?}", session.exit_status());
    }

    fn on_clipboard_text(&mut self, _session: &Session, text: &str) {
        tracing::debug!("clipboard: {} bytes", text.len());
    }

    fn on_bell(&mut self, _session: &Session) {
        tracing::debug!("bell");
    }
}

#[derive(Clone, Copy)]
enum OutputFormat {
    Screen,
    Transcript,
    Json,
}

fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mut cols = 80u16;
    let mut rows = 24u16;
    let mut config_file: Option<PathBuf> = None;
    let mut input: Option<String> = None;
    let mut output_format = OutputFormat::Screen;
    let mut command: Vec<String> = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-c" | "--cols" => {
                i += 1;
                if i < args.len() {
                    cols = args[i].parse().unwrap_or(80);
                }
            },
            "-r" | "--rows" => {
                i += 1;
                if i < args.len() {
                    rows = args[i].parse().unwrap_or(24);
                }
            },
            "--config" => {
                i += 1;
                if i < args.len() {
                    config_file = Some(PathBuf::from(&args[i]));
                }
            },
            "-i" | "--input" => {
                i += 1;
                if i < args.len() {
                    input = Some(args[i].clone());
                }
            },
            "-j" | "--json" => output_format = OutputFormat::Json,
            "-a" | "--all" => output_format = OutputFormat::Transcript,
            "-h" | "--help" => {
                print_help();
                return ExitCode::SUCCESS;
            },
            "--" => {
                command = args[i + 1..].to_vec();
                break;
            },
            other if other.starts_with('-') => {
                eprintln!("Unknown option '{}'", other);
                return ExitCode::FAILURE;
            },
            _ => {
                command = args[i..].to_vec();
                break;
            },
        }
        i += 1;
    }

    let config = match (&config_file, command.first()) {
        (Some(path), _) => match SessionConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error loading config '{}': {}", path.display(), e);
                return ExitCode::FAILURE;
            },
        },
        (None, Some(executable)) => SessionConfig::new(executable.clone()).with_args(command.clone()),
        (None, None) => SessionConfig::shell(),
    };

    let mut session = Session::new(config, Box::new(LoggingCallback));
    if let Err(e) = session.update_size(cols, rows) {
        eprintln!("Error starting session: {}", e);
        return ExitCode::FAILURE;
    }

    if let Some(text) = &input {
        session.write(unescape(text).as_bytes());
    }

    let exit_code = session.run_until_finished().unwrap_or(1);

    if let Some(emulator) = session.emulator() {
        match output_format {
            OutputFormat::Screen => print!("{}", emulator.snapshot().to_text()),
            OutputFormat::Transcript => println!("{}", emulator.screen().transcript_text()),
            OutputFormat::Json => match emulator.snapshot().to_json() {
                Ok(json) => println!("{}", json),
                Err(e) => {
                    eprintln!("Error serializing snapshot: {}", e);
                    return ExitCode::FAILURE;
                },
            },
        }
    }

    // Shell convention for signal deaths
    let status = if exit_code < 0 { 128 - exit_code } else { exit_code };
    ExitCode::from(status.clamp(0, 255) as u8)
}

/// Expand `\n`, `\r`, `\t`, `\e` and `\\` in `--input`
fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('e') => out.push('\x1b'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn print_help() {
    println!("termsession-run: run a command in a headless terminal session");
    println!();
    println!("Usage: termsession-run [OPTIONS] [--] [COMMAND [ARGS...]]");
    println!();
    println!("Options:");
    println!("  -c, --cols <N>       Set terminal width (default: 80)");
    println!("  -r, --rows <N>       Set terminal height (default: 24)");
    println!("      --config <PATH>  Load the session configuration from a JSON file");
    println!("  -i, --input <TEXT>   Send TEXT to the command (\\n, \\r, \\t, \\e escapes)");
    println!("  -a, --all            Print scrollback and screen instead of the screen");
    println!("  -j, --json           Print a JSON snapshot of the screen");
    println!("  -h, --help           Show this help message");
    println!();
    println!("Without a command the login shell ($SHELL) is started.");
    println!("The exit status is the command's exit code.");
    println!();
    println!("Examples:");
    println!("  termsession-run -- ls --color=always");
    println!("  termsession-run -i 'echo hi\\nexit\\n' /bin/sh");
}
