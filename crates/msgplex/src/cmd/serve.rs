use std::sync::Arc;

use msgplex_rpc::{BoxFuture, CancellationToken, RpcFailure, RpcHandler, Value};
use tracing::info;

use crate::cmd::ServeArgs;
use crate::exit::CliResult;

/// Demo service served under the `echo` path.
///
/// `echo` returns its arguments, `ping` answers `pong`, and `sleep` waits
/// for its first argument in milliseconds, answering early with
/// `"cancelled"` when the caller cancels.
pub(crate) struct EchoService;

impl RpcHandler for EchoService {
    fn handle_request(
        &self,
        method: String,
        args: Vec<Value>,
        token: CancellationToken,
    ) -> BoxFuture<'static, Result<Value, RpcFailure>> {
        Box::pin(async move {
            match method.as_str() {
                "echo" => Ok(Value::Array(args)),
                "ping" => Ok(Value::from("pong")),
                "sleep" => {
                    let ms = args.first().and_then(Value::as_i64).unwrap_or(1000);
                    let nap = std::time::Duration::from_millis(ms.max(0) as u64);
                    tokio::select! {
                        _ = tokio::time::sleep(nap) => Ok(Value::from("done")),
                        _ = token.cancelled() => Ok(Value::from("cancelled")),
                    }
                }
                other => Err(RpcFailure::new(format!("unknown method {other:?}"))),
            }
        })
    }

    fn handle_notification(&self, method: String, args: Vec<Value>) {
        info!(method, count = args.len(), "notification received");
    }
}

#[cfg(unix)]
pub async fn run(args: ServeArgs) -> CliResult<i32> {
    use msgplex_channel::{from_stream, ChannelMultiplexer};
    use msgplex_rpc::{ConnectionRouter, RpcConnectionHandler};
    use msgplex_transport::{peer_credentials, UdsListener};
    use tracing::debug;

    use crate::exit::{transport_error, SUCCESS};

    let listener =
        UdsListener::bind(&args.path).map_err(|err| transport_error("bind failed", err))?;
    info!(path = %args.path.display(), "serving; press ctrl-c to stop");

    let mut router = ConnectionRouter::new();
    router.register(Arc::new(RpcConnectionHandler::new("echo", |_peer| {
        Arc::new(EchoService) as Arc<dyn RpcHandler>
    })));
    let router = Arc::new(router);

    loop {
        let stream = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(stream) => stream,
                Err(err) => return Err(transport_error("accept failed", err)),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                return Ok(SUCCESS);
            }
        };
        if let Some(peer) = peer_credentials(&stream) {
            debug!(uid = peer.uid, pid = peer.pid, "peer connected");
        }

        let router = Arc::clone(&router);
        tokio::spawn(async move {
            let mut mux = ChannelMultiplexer::new(from_stream("uds", stream));
            router.serve(&mut mux).await;
        });
    }
}

#[cfg(not(unix))]
pub async fn run(_args: ServeArgs) -> CliResult<i32> {
    use crate::exit::{CliError, TRANSPORT_ERROR};

    Err(CliError::new(
        TRANSPORT_ERROR,
        "unix domain sockets are not available on this platform",
    ))
}
