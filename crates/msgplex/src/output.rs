use std::io::{IsTerminal, Write};
use std::time::Duration;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use msgplex_codec::Value;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// One completed call, ready to print.
pub struct CallReport<'a> {
    pub service: &'a str,
    pub method: &'a str,
    pub elapsed: Duration,
    pub result: &'a Value,
}

#[derive(Serialize)]
struct CallOutput<'a> {
    schema_id: &'a str,
    service: &'a str,
    method: &'a str,
    elapsed_ms: u128,
    result_type: &'a str,
    result: serde_json::Value,
}

pub fn print_call_report(report: &CallReport<'_>, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = CallOutput {
                schema_id: "https://msgplex.dev/schemas/cli/v1/call-result.schema.json",
                service: report.service,
                method: report.method,
                elapsed_ms: report.elapsed.as_millis(),
                result_type: report.result.type_name(),
                result: report.result.to_json(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["SERVICE", "METHOD", "TYPE", "ELAPSED", "RESULT"])
                .add_row(vec![
                    report.service.to_string(),
                    report.method.to_string(),
                    report.result.type_name().to_string(),
                    format!("{:?}", report.elapsed),
                    result_preview(report.result),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "service={} method={} type={} elapsed={:?} result={}",
                report.service,
                report.method,
                report.result.type_name(),
                report.elapsed,
                result_preview(report.result)
            );
        }
        OutputFormat::Raw => match report.result {
            Value::Bytes(bytes) => print_raw(bytes),
            other => println!("{}", other.to_json()),
        },
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn result_preview(value: &Value) -> String {
    match value {
        Value::Bytes(bytes) => format!("<binary {} bytes>", bytes.len()),
        Value::Undefined => "undefined".to_string(),
        other => other.to_json().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_results_are_previewed_not_dumped() {
        let value = Value::Bytes(vec![0u8, 159, 146, 150].into());
        assert_eq!(result_preview(&value), "<binary 4 bytes>");
    }

    #[test]
    fn json_output_serializes_the_result() {
        let value = Value::from("hello");
        let out = CallOutput {
            schema_id: "x",
            service: "echo",
            method: "echo",
            elapsed_ms: 3,
            result_type: value.type_name(),
            result: value.to_json(),
        };
        let json = serde_json::to_string(&out).expect("call output should serialize");
        assert!(json.contains("\"result\":\"hello\""));
        assert!(json.contains("\"schema_id\""));
    }
}
