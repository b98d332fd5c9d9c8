use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use msgplex_codec::Value;

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod call;
pub mod doctor;
pub mod envinfo;
pub mod notify;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the built-in demo services on a Unix socket.
    Serve(ServeArgs),
    /// Call a method on a served service and print the reply.
    Call(CallArgs),
    /// Send a one-way notification to a served service.
    Notify(NotifyArgs),
    /// Run in-process loopback health checks.
    Doctor(DoctorArgs),
    /// Show version information.
    Version(VersionArgs),
    /// Print build and environment diagnostics.
    Envinfo(EnvinfoArgs),
}

pub async fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args).await,
        Command::Call(args) => call::run(args, format).await,
        Command::Notify(args) => notify::run(args).await,
        Command::Doctor(args) => doctor::run(args, format).await,
        Command::Version(args) => version::run(args),
        Command::Envinfo(args) => envinfo::run(args, format),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Socket path to bind.
    pub path: PathBuf,
}

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Socket path to connect to.
    pub path: PathBuf,
    /// Service channel to open.
    #[arg(long, short = 's', default_value = "echo")]
    pub service: String,
    /// Method to call.
    #[arg(long, short = 'm')]
    pub method: String,
    /// Arguments as a JSON array.
    #[arg(long, conflicts_with = "arg")]
    pub args: Option<String>,
    /// A single string argument; repeatable.
    #[arg(long)]
    pub arg: Vec<String>,
    /// Give up waiting for the reply after this long (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
    /// Cancel the request after this long and print whatever the remote
    /// answers.
    #[arg(long, value_name = "DURATION")]
    pub cancel_after: Option<String>,
}

#[derive(Args, Debug)]
pub struct NotifyArgs {
    /// Socket path to connect to.
    pub path: PathBuf,
    /// Service channel to open.
    #[arg(long, short = 's', default_value = "echo")]
    pub service: String,
    /// Method to notify.
    #[arg(long, short = 'm')]
    pub method: String,
    /// Arguments as a JSON array.
    #[arg(long, conflicts_with = "arg")]
    pub args: Option<String>,
    /// A single string argument; repeatable.
    #[arg(long)]
    pub arg: Vec<String>,
}

#[derive(Args, Debug, Default)]
pub struct DoctorArgs {}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

#[derive(Args, Debug, Default)]
pub struct EnvinfoArgs {}

/// Build the argument list from `--args` (a JSON array) or repeated
/// `--arg` strings.
pub(crate) fn parse_value_args(json: Option<&str>, strings: &[String]) -> CliResult<Vec<Value>> {
    if let Some(json) = json {
        let parsed: serde_json::Value = serde_json::from_str(json)
            .map_err(|err| CliError::new(USAGE, format!("--args is not valid JSON: {err}")))?;
        let serde_json::Value::Array(items) = parsed else {
            return Err(CliError::new(USAGE, "--args must be a JSON array"));
        };
        return Ok(items.into_iter().map(Value::from).collect());
    }
    Ok(strings
        .iter()
        .map(|text| Value::from(text.as_str()))
        .collect())
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_args_become_values() {
        let args = parse_value_args(Some(r#"["hi", 2, null]"#), &[]).unwrap();
        assert_eq!(args.len(), 3);
        assert_eq!(args[0], Value::from("hi"));
        assert_eq!(args[1].as_i64(), Some(2));
    }

    #[test]
    fn non_array_json_args_are_rejected() {
        let err = parse_value_args(Some(r#"{"x": 1}"#), &[]).unwrap_err();
        assert_eq!(err.code, USAGE);
    }

    #[test]
    fn string_args_pass_through() {
        let strings = vec!["one".to_string(), "two".to_string()];
        let args = parse_value_args(None, &strings).unwrap();
        assert_eq!(args, vec![Value::from("one"), Value::from("two")]);
    }

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
    }
}
