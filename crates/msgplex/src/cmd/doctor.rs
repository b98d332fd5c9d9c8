use std::sync::Arc;
use std::time::{Duration, Instant};

use msgplex_channel::{pair, ChannelMultiplexer};
use msgplex_codec::CodecRegistry;
use msgplex_rpc::{
    CancellationToken, ConnectionRouter, ProxyFactory, RpcConnectionHandler, RpcHandler,
    RpcProtocol, Value,
};
use serde::Serialize;

use crate::cmd::serve::EchoService;
use crate::cmd::DoctorArgs;
use crate::exit::{CliResult, HEALTH_CHECK_FAILED, SUCCESS};
use crate::output::OutputFormat;

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Pass,
    Fail,
    Info,
    Skip,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    name: String,
    status: CheckStatus,
    detail: String,
}

impl CheckResult {
    fn new(name: &str, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorOutput {
    schema_id: &'static str,
    checks: Vec<CheckResult>,
    overall: &'static str,
}

pub async fn run(_args: DoctorArgs, format: OutputFormat) -> CliResult<i32> {
    let checks = vec![
        platform_transport_check(),
        socket_bind_check(),
        loopback_rpc_check().await,
        cancellation_check().await,
        value_codec_check(),
    ];

    let has_fail = checks.iter().any(|c| matches!(c.status, CheckStatus::Fail));
    let overall = if has_fail { "fail" } else { "pass" };

    let output = DoctorOutput {
        schema_id: "https://msgplex.dev/schemas/cli/v1/doctor-report.schema.json",
        checks,
        overall,
    };

    print_doctor(&output, format);

    if has_fail {
        Ok(HEALTH_CHECK_FAILED)
    } else {
        Ok(SUCCESS)
    }
}

fn platform_transport_check() -> CheckResult {
    #[cfg(unix)]
    {
        CheckResult::new(
            "platform_transport",
            CheckStatus::Pass,
            "Unix domain sockets available",
        )
    }

    #[cfg(not(unix))]
    {
        CheckResult::new(
            "platform_transport",
            CheckStatus::Fail,
            "no socket transport backend on this platform",
        )
    }
}

#[cfg(unix)]
fn socket_bind_check() -> CheckResult {
    use msgplex_transport::UdsListener;

    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();
    let dir = std::env::temp_dir().join(format!("msgplex-doctor-{}-{nanos}", std::process::id()));
    if let Err(err) = std::fs::create_dir_all(&dir) {
        return CheckResult::new(
            "socket_bind",
            CheckStatus::Fail,
            format!("scratch dir creation failed: {err}"),
        );
    }

    let outcome = match UdsListener::bind(dir.join("doctor.sock")) {
        Ok(listener) => {
            drop(listener);
            CheckResult::new(
                "socket_bind",
                CheckStatus::Pass,
                "scratch socket bind succeeded",
            )
        }
        Err(err) => CheckResult::new(
            "socket_bind",
            CheckStatus::Fail,
            format!("scratch socket bind failed: {err}"),
        ),
    };
    let _ = std::fs::remove_dir_all(&dir);
    outcome
}

#[cfg(not(unix))]
fn socket_bind_check() -> CheckResult {
    CheckResult::new(
        "socket_bind",
        CheckStatus::Skip,
        "socket bind probe not supported on this platform",
    )
}

async fn loopback_rpc_check() -> CheckResult {
    match tokio::time::timeout(Duration::from_secs(2), loopback_probe()).await {
        Ok(Ok(elapsed)) => CheckResult::new(
            "loopback_rpc",
            CheckStatus::Pass,
            format!("echo round trip in {elapsed:?}"),
        ),
        Ok(Err(detail)) => CheckResult::new("loopback_rpc", CheckStatus::Fail, detail),
        Err(_) => CheckResult::new("loopback_rpc", CheckStatus::Fail, "probe timed out"),
    }
}

/// Full-stack loopback: channel pair, multiplexer on each end, routed
/// echo service, one proxied call.
async fn loopback_probe() -> Result<Duration, String> {
    let (left, right) = pair("loopback");
    let mut serving = ChannelMultiplexer::new(left);
    let client = ChannelMultiplexer::new(right);

    let mut router = ConnectionRouter::new();
    router.register(Arc::new(RpcConnectionHandler::new("echo", |_peer| {
        Arc::new(EchoService) as Arc<dyn RpcHandler>
    })));
    let serving_task = tokio::spawn(async move { router.serve(&mut serving).await });

    let channel = client
        .open("echo")
        .await
        .map_err(|err| format!("open failed: {err}"))?;
    let factory = ProxyFactory::new();
    factory.listen(channel);

    let started = Instant::now();
    let reply = factory
        .proxy()
        .call("echo", vec![Value::from("doctor")])
        .await
        .map_err(|err| format!("call failed: {err}"))?;
    if reply != Value::Array(vec![Value::from("doctor")]) {
        return Err(format!("unexpected reply: {reply:?}"));
    }

    client.close();
    let _ = serving_task.await;
    Ok(started.elapsed())
}

async fn cancellation_check() -> CheckResult {
    match tokio::time::timeout(Duration::from_secs(2), cancellation_probe()).await {
        Ok(Ok(elapsed)) => CheckResult::new(
            "cancellation",
            CheckStatus::Pass,
            format!("cooperative cancel honored in {elapsed:?}"),
        ),
        Ok(Err(detail)) => CheckResult::new("cancellation", CheckStatus::Fail, detail),
        Err(_) => CheckResult::new("cancellation", CheckStatus::Fail, "probe timed out"),
    }
}

/// Cancel a long `sleep` call mid-flight; the handler must answer
/// `"cancelled"` well before the nap would end.
async fn cancellation_probe() -> Result<Duration, String> {
    let (left, right) = pair("cancel-probe");
    let client = RpcProtocol::new(left, None);
    let _server = RpcProtocol::new(right, Some(Arc::new(EchoService) as Arc<dyn RpcHandler>));

    let token = CancellationToken::new();
    let started = Instant::now();
    let (reply, ()) = tokio::join!(
        client.send_request_with_token("sleep", vec![Value::from(60_000i64)], &token),
        async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        }
    );

    match reply {
        Ok(value) if value == Value::from("cancelled") => Ok(started.elapsed()),
        Ok(other) => Err(format!("unexpected reply: {other:?}")),
        Err(err) => Err(format!("probe call failed: {err}")),
    }
}

fn value_codec_check() -> CheckResult {
    let tags = CodecRegistry::new().tags();
    CheckResult::new(
        "value_codecs",
        CheckStatus::Info,
        format!("built-in tags {tags:?}"),
    )
}

fn print_doctor(output: &DoctorOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(output).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("msgplex doctor\n");
            for c in &output.checks {
                println!(
                    "  [{:>4}] {:<20} {}",
                    status_text(c.status),
                    c.name,
                    c.detail
                );
            }
            if output.overall == "pass" {
                println!("\n  Result: all checks passed");
            } else {
                println!("\n  Result: one or more checks failed");
            }
        }
        OutputFormat::Raw => {
            println!("{}", output.overall);
        }
    }
}

fn status_text(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Pass => "PASS",
        CheckStatus::Fail => "FAIL",
        CheckStatus::Info => "INFO",
        CheckStatus::Skip => "SKIP",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doctor_output_has_overall_status() {
        let output = DoctorOutput {
            schema_id: "x",
            checks: vec![CheckResult::new("x", CheckStatus::Pass, "ok")],
            overall: "pass",
        };
        let json = serde_json::to_string(&output).expect("doctor output should serialize");
        assert!(json.contains("\"overall\":\"pass\""));
        assert!(json.contains("\"status\":\"pass\""));
    }

    #[tokio::test]
    async fn loopback_and_cancellation_probes_pass() {
        let loopback = loopback_rpc_check().await;
        assert!(
            matches!(loopback.status, CheckStatus::Pass),
            "{}",
            loopback.detail
        );

        let cancel = cancellation_check().await;
        assert!(
            matches!(cancel.status, CheckStatus::Pass),
            "{}",
            cancel.detail
        );
    }
}
