use crate::cmd::NotifyArgs;
use crate::exit::CliResult;

#[cfg(unix)]
pub async fn run(args: NotifyArgs) -> CliResult<i32> {
    use std::time::Duration;

    use msgplex_channel::{from_stream, ChannelMultiplexer};
    use msgplex_rpc::ProxyFactory;
    use msgplex_transport::connect;
    use tracing::info;

    use crate::cmd::parse_value_args;
    use crate::exit::{channel_error, rpc_error, transport_error, SUCCESS};

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
    factory
        .proxy()
        .notify(&args.method, call_args)
        .await
        .map_err(|err| rpc_error("notify failed", err))?;
    info!(service = args.service, method = args.method, "notified");

    mux.close();
    // The stream writer flushes queued frames on a background task after
    // the close; the process has to outlive that.
    tokio::time::sleep(Duration::from_millis(50)).await;
    Ok(SUCCESS)
}

#[cfg(not(unix))]
pub async fn run(_args: NotifyArgs) -> CliResult<i32> {
    use crate::exit::{CliError, TRANSPORT_ERROR};

    Err(CliError::new(
        TRANSPORT_ERROR,
        "unix domain sockets are not available on this platform",
    ))
}
