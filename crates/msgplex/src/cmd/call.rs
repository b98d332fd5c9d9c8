use crate::cmd::CallArgs;
use crate::exit::CliResult;
use crate::output::OutputFormat;

#[cfg(unix)]
pub async fn run(args: CallArgs, format: OutputFormat) -> CliResult<i32> {
    use std::time::Instant;

    use msgplex_channel::{from_stream, ChannelMultiplexer};
    use msgplex_rpc::{CancellationToken, ProxyFactory};
    use msgplex_transport::connect;

    use crate::cmd::{parse_duration, parse_value_args};
    use crate::exit::{channel_error, rpc_error, transport_error, CliError, SUCCESS, TIMEOUT};
    use crate::output::{print_call_report, CallReport};

    let deadline = parse_duration(&args.timeout)?;
    let cancel_after = args
        .cancel_after
        .as_deref()
        .map(parse_duration)
        .transpose()?;
    let call_args = parse_value_args(args.args.as_deref(), &args.arg)?;

    let stream = connect(&args.path)
        .await
        .map_err(|err| transport_error("connect failed", err))?;
    let mux = ChannelMultiplexer::new(from_stream("uds", stream));
    let channel = mux
        .open(&args.service)
        .await
        .map_err(|err| channel_error("open failed", err))?;

    let factory = ProxyFactory::new();
    factory.listen(channel);
    let proxy = factory.proxy();

    let token = CancellationToken::new();
    if let Some(after) = cancel_after {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            token.cancel();
        });
    }

    let started = Instant::now();
    let call = proxy.call_with_token(&args.method, call_args, &token);
    let result = match tokio::time::timeout(deadline, call).await {
        Ok(Ok(value)) => value,
        Ok(Err(err)) => return Err(rpc_error("call failed", err)),
        Err(_) => {
            return Err(CliError::new(
                TIMEOUT,
                format!("no reply within {}", args.timeout),
            ))
        }
    };

    print_call_report(
        &CallReport {
            service: &args.service,
            method: &args.method,
            elapsed: started.elapsed(),
            result: &result,
        },
        format,
    );

    mux.close();
    Ok(SUCCESS)
}

#[cfg(not(unix))]
pub async fn run(_args: CallArgs, _format: OutputFormat) -> CliResult<i32> {
    use crate::exit::{CliError, TRANSPORT_ERROR};

    Err(CliError::new(
        TRANSPORT_ERROR,
        "unix domain sockets are not available on this platform",
    ))
}
