//! Command-line entry point for the user configuration store.
//!
//! # Responsibility
//! - Load settings, start logging and open the application context.
//! - Expose `get`, `create`, `ping` and `version` commands.
//!
//! # Invariants
//! - Exit code 2 means "user not found"; 1 means any other failure.

use log::info;
use std::path::PathBuf;
use std::process::ExitCode;
use userconf_core::{init_logging_from, AppContext, Settings, UserInput};

const USAGE: &str = "usage: userconf_cli [--config <file>] <get <client_id> | create <json> | ping | version>";

enum Command {
    Get(String),
    Create(String),
    Ping,
    Version,
}

struct Args {
    config: Option<PathBuf>,
    command: Command,
}

fn main() -> ExitCode {
    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{message}");
            eprintln!("{USAGE}");
            return ExitCode::from(1);
        }
    };

    match args.command {
        Command::Ping => {
            println!("{}", userconf_core::ping());
            ExitCode::SUCCESS
        }
        Command::Version => {
            println!("{}", userconf_core::core_version());
            ExitCode::SUCCESS
        }
        Command::Get(client_id) => run(args.config, |context| {
            match context.get_user(&client_id).map_err(|err| err.to_string())? {
                Some(document) => {
                    print_json(&document)?;
                    Ok(ExitCode::SUCCESS)
                }
                None => {
                    eprintln!("not found");
                    Ok(ExitCode::from(2))
                }
            }
        }),
        Command::Create(payload) => run(args.config, |context| {
            let input: UserInput = serde_json::from_str(&payload)
                .map_err(|err| format!("invalid user input: {err}"))?;
            match context.create_user(input).map_err(|err| err.to_string())? {
                Some(document) => {
                    print_json(&document)?;
                    Ok(ExitCode::SUCCESS)
                }
                None => Err("created user could not be read back".to_string()),
            }
        }),
    }
}

fn run<F>(config: Option<PathBuf>, command: F) -> ExitCode
where
    F: FnOnce(&AppContext) -> Result<ExitCode, String>,
{
    let outcome = open_context(config).and_then(|context| {
        let result = command(&context);
        context.shutdown();
        result
    });
    match outcome {
        Ok(code) => code,
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::from(1)
        }
    }
}

fn open_context(config: Option<PathBuf>) -> Result<AppContext, String> {
    let settings = Settings::load(config.as_deref()).map_err(|err| err.to_string())?;
    init_logging_from(&settings.logging)?;
    info!(
        "event=cli_start module=cli status=ok version={}",
        userconf_core::core_version()
    );
    AppContext::open(&settings).map_err(|err| err.to_string())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), String> {
    let rendered = serde_json::to_string_pretty(value).map_err(|err| err.to_string())?;
    println!("{rendered}");
    Ok(())
}

fn parse_args<I>(mut args: I) -> Result<Args, String>
where
    I: Iterator<Item = String>,
{
    let mut config = None;
    let command = loop {
        match args.next().as_deref() {
            Some("--config") => {
                let path = args.next().ok_or("--config requires a file path")?;
                config = Some(PathBuf::from(path));
            }
            Some("get") => {
                let client_id = args.next().ok_or("get requires a client_id")?;
                break Command::Get(client_id);
            }
            Some("create") => {
                let payload = args.next().ok_or("create requires a JSON payload")?;
                break Command::Create(payload);
            }
            Some("ping") => break Command::Ping,
            Some("version") => break Command::Version,
            Some(other) => return Err(format!("unknown argument `{other}`")),
            None => return Err("missing command".to_string()),
        }
    };

    if let Some(extra) = args.next() {
        return Err(format!("unexpected argument `{extra}`"));
    }
    Ok(Args { config, command })
}

#[cfg(test)]
mod tests {
    use super::{parse_args, Command};

    fn parse(items: &[&str]) -> Result<super::Args, String> {
        parse_args(items.iter().map(|item| item.to_string()))
    }

    #[test]
    fn parses_get_with_config() {
        let args = parse(&["--config", "/etc/userconf.toml", "get", "acme"]).unwrap();
        assert_eq!(
            args.config.as_deref(),
            Some(std::path::Path::new("/etc/userconf.toml"))
        );
        assert!(matches!(args.command, Command::Get(ref id) if id == "acme"));
    }

    #[test]
    fn rejects_missing_and_extra_arguments() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["get"]).is_err());
        assert!(parse(&["ping", "again"]).is_err());
        assert!(parse(&["--config"]).is_err());
    }
}
