//! Plugin side of the subprocess protocol.

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::error::{PluginError, PluginResult};
use crate::process::HostConfig;
use crate::protocol::{Call, Hello, Reply, Request, Response};
use crate::registry::PluginHandle;

/// Serve `handle` as `name` over stdin/stdout until the host closes stdin.
///
/// Refuses to start unless the host set the handshake cookie.
pub async fn serve(config: &HostConfig, name: &str, handle: PluginHandle) -> PluginResult<()> {
    match std::env::var(&config.cookie_key) {
        Ok(value) if value == config.cookie_value => {}
        _ => {
            return Err(PluginError::Handshake(
                "this binary is a pipego plugin and must be started by the scheduler".to_string(),
            ));
        }
    }

    serve_io(
        config.protocol_version,
        name,
        handle,
        tokio::io::stdin(),
        tokio::io::stdout(),
    )
    .await
}

/// Write the hello line, then answer every call line with a reply line.
///
/// Each call runs on its own task, so replies leave in completion order.
/// Returns once the host has closed the request stream and every call in
/// flight has been answered.
pub async fn serve_io<R, W>(
    protocol_version: u32,
    name: &str,
    handle: PluginHandle,
    reader: R,
    mut writer: W,
) -> PluginResult<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let hello = Hello {
        protocol_version,
        kind: handle.stage(),
        name: name.to_string(),
    };
    write_line(&mut writer, &hello).await?;

    let mut lines = BufReader::new(reader).lines();
    let mut in_flight = JoinSet::new();
    let mut open = true;

    while open || !in_flight.is_empty() {
        tokio::select! {
            line = lines.next_line(), if open => {
                let Some(line) = line.map_err(|e| PluginError::Transport(e.to_string()))? else {
                    debug!(plugin = %name, "host closed the request stream");
                    open = false;
                    continue;
                };
                if line.trim().is_empty() {
                    continue;
                }

                match serde_json::from_str::<Call>(&line) {
                    Ok(Call { id, request }) => {
                        let handle = handle.clone();
                        in_flight.spawn(async move {
                            Reply {
                                id,
                                response: dispatch(&handle, request).await,
                            }
                        });
                    }
                    Err(e) => {
                        let reply = Reply {
                            id: call_id(&line),
                            response: Response::Error(format!("malformed request: {e}")),
                        };
                        write_line(&mut writer, &reply).await?;
                    }
                }
            }
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                match joined {
                    Ok(reply) => write_line(&mut writer, &reply).await?,
                    Err(e) => error!(plugin = %name, error = %e, "plugin call task failed"),
                }
            }
        }
    }

    Ok(())
}

/// Best-effort id of a line that is not a well-formed call.
fn call_id(line: &str) -> u64 {
    #[derive(Deserialize)]
    struct Id {
        id: u64,
    }

    serde_json::from_str::<Id>(line).map_or(0, |Id { id }| id)
}

async fn dispatch(handle: &PluginHandle, req: Request) -> Response {
    let result = match (handle, req) {
        (PluginHandle::Fetch(p), Request::Fetch { host }) => p.fetch(&host).await.map(Response::Fetch),
        (PluginHandle::Filter(p), Request::Filter { args }) => {
            p.filter(&args).await.map(Response::Filter)
        }
        (PluginHandle::Score(p), Request::Score { args }) => p.score(&args).await.map(Response::Score),
        (handle, req) => {
            return Response::Error(format!(
                "{} plugin cannot serve a {} request",
                handle.stage(),
                req.stage()
            ));
        }
    };

    result.unwrap_or_else(|e| Response::Error(e.to_string()))
}

async fn write_line<W, T>(writer: &mut W, msg: &T) -> PluginResult<()>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let mut line = serde_json::to_vec(msg).map_err(|e| PluginError::Protocol(e.to_string()))?;
    line.push(b'\n');
    writer
        .write_all(&line)
        .await
        .map_err(|e| PluginError::Transport(e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| PluginError::Transport(e.to_string()))
}
