//! Host side of subprocess plugins.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use pipego_core::config::HostSpec;
use pipego_core::{Args, FetchResult, FilterResult, ScoreResult, Stage};

use crate::contract::{FetchPlugin, FilterPlugin, ScorePlugin};
use crate::error::{PluginError, PluginResult};
use crate::protocol::{Call, Hello, Reply, Request, Response};
use crate::registry::PluginHandle;

/// Handshake and call settings shared by host and plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    pub protocol_version: u32,
    pub cookie_key: String,
    pub cookie_value: String,
    /// Upper bound for the hello line and for each call.
    pub call_timeout: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self::from(&HostSpec::default())
    }
}

impl From<&HostSpec> for HostConfig {
    fn from(spec: &HostSpec) -> Self {
        Self {
            protocol_version: spec.protocol_version,
            cookie_key: spec.cookie_key.clone(),
            cookie_value: spec.cookie_value.clone(),
            call_timeout: Duration::from_secs(spec.call_timeout_secs),
        }
    }
}

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// Calls waiting for their reply, keyed by call id.
#[derive(Default)]
struct Pending {
    calls: Mutex<HashMap<u64, oneshot::Sender<Response>>>,
    closed: AtomicBool,
}

impl Pending {
    async fn register(&self, id: u64) -> Option<oneshot::Receiver<Response>> {
        let mut calls = self.calls.lock().await;
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        calls.insert(id, tx);
        Some(rx)
    }

    async fn forget(&self, id: u64) {
        self.calls.lock().await.remove(&id);
    }

    /// Refuse new calls and fail every waiting one.
    async fn close(&self) {
        let mut calls = self.calls.lock().await;
        self.closed.store(true, Ordering::Release);
        calls.clear();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Route reply lines to their callers until the plugin's output ends.
async fn route_replies<R>(name: String, mut lines: Lines<BufReader<R>>, pending: Arc<Pending>)
where
    R: AsyncRead + Unpin,
{
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => {}
            Ok(Some(line)) => match serde_json::from_str::<Reply>(&line) {
                Ok(Reply { id, response }) => match pending.calls.lock().await.remove(&id) {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => debug!(plugin = %name, id, "reply for a call nobody waits on"),
                },
                Err(e) => {
                    warn!(plugin = %name, error = %e, "malformed reply from plugin");
                    break;
                }
            },
            Ok(None) => {
                debug!(plugin = %name, "plugin closed its output");
                break;
            }
            Err(e) => {
                warn!(plugin = %name, error = %e, "failed to read from plugin");
                break;
            }
        }
    }

    pending.close().await;
}

/// A plugin running as a child process.
///
/// Calls are multiplexed: each carries an id, a reader task hands every reply
/// to the call with the same id, and any number of calls may be in flight.
/// A call that times out, or a plugin that closes its output or writes
/// malformed JSON, breaks the channel and kills the child; every later call
/// fails with [`PluginError::Broken`].
pub struct ProcessPlugin {
    name: String,
    kind: Stage,
    path: PathBuf,
    call_timeout: Duration,
    next_id: AtomicU64,
    writer: Mutex<Option<Writer>>,
    child: Mutex<Option<Child>>,
    pending: Arc<Pending>,
    reader: JoinHandle<()>,
}

impl ProcessPlugin {
    /// Start the binary and complete the handshake.
    pub async fn spawn(
        path: &Path,
        name: &str,
        kind: Stage,
        config: &HostConfig,
    ) -> PluginResult<Self> {
        let mut child = Command::new(path)
            .env(&config.cookie_key, &config.cookie_value)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| PluginError::Spawn {
                path: path.to_path_buf(),
                source,
            })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(PluginError::Handshake("plugin stdio not piped".to_string()));
        };

        let plugin = Self::connect(
            path.to_path_buf(),
            name,
            kind,
            config,
            Some(child),
            stdout,
            Box::new(stdin),
        )
        .await?;

        debug!(plugin = %name, stage = %kind, path = %path.display(), "plugin process started");
        Ok(plugin)
    }

    /// Complete the handshake over an already open channel and start routing
    /// replies. Dropping `child` on failure kills it.
    async fn connect<R>(
        path: PathBuf,
        name: &str,
        kind: Stage,
        config: &HostConfig,
        child: Option<Child>,
        reader: R,
        writer: Writer,
    ) -> PluginResult<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let mut lines = BufReader::new(reader).lines();

        let line = tokio::time::timeout(config.call_timeout, lines.next_line())
            .await
            .map_err(|_| PluginError::Timeout(config.call_timeout))?
            .map_err(|e| PluginError::Handshake(e.to_string()))?
            .ok_or_else(|| {
                PluginError::Handshake("plugin closed its output before the hello line".to_string())
            })?;

        let hello: Hello = serde_json::from_str(&line)
            .map_err(|e| PluginError::Handshake(format!("malformed hello: {e}")))?;

        if hello.protocol_version != config.protocol_version {
            return Err(PluginError::Handshake(format!(
                "protocol version {} != {}",
                hello.protocol_version, config.protocol_version
            )));
        }
        if hello.kind != kind {
            return Err(PluginError::Handshake(format!(
                "plugin serves {} but {} was requested",
                hello.kind, kind
            )));
        }
        if hello.name != name {
            return Err(PluginError::Handshake(format!(
                "plugin name {} != {}",
                hello.name, name
            )));
        }

        let pending = Arc::new(Pending::default());
        let reader = tokio::spawn(route_replies(name.to_string(), lines, pending.clone()));

        Ok(Self {
            name: name.to_string(),
            kind,
            path,
            call_timeout: config.call_timeout,
            next_id: AtomicU64::new(1),
            writer: Mutex::new(Some(writer)),
            child: Mutex::new(child),
            pending,
            reader,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> Stage {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_broken(&self) -> bool {
        self.pending.is_closed()
    }

    /// A handle of the capability the plugin announced.
    pub fn handle(self: &Arc<Self>) -> PluginHandle {
        match self.kind {
            Stage::Fetch => PluginHandle::Fetch(self.clone()),
            Stage::Filter => PluginHandle::Filter(self.clone()),
            Stage::Score => PluginHandle::Score(self.clone()),
        }
    }

    /// Stop the child. Later calls fail with [`PluginError::Broken`].
    pub async fn kill(&self) -> PluginResult<()> {
        self.pending.close().await;
        self.writer.lock().await.take();
        self.reader.abort();

        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(());
        };
        child
            .kill()
            .await
            .map_err(|e| PluginError::Transport(e.to_string()))
    }

    async fn call(&self, request: Request) -> PluginResult<Response> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let Some(reply) = self.pending.register(id).await else {
            return Err(PluginError::Broken(self.name.clone()));
        };

        let result = match tokio::time::timeout(self.call_timeout, self.exchange(id, request, reply))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(PluginError::Timeout(self.call_timeout)),
        };

        match result {
            Ok(Response::Error(reason)) => Err(PluginError::Protocol(reason)),
            Ok(resp) => Ok(resp),
            Err(err @ PluginError::Broken(_)) => Err(err),
            Err(err) => {
                self.pending.forget(id).await;
                warn!(plugin = %self.name, error = %err, "plugin process marked broken");
                if let Err(e) = self.kill().await {
                    debug!(plugin = %self.name, error = %e, "failed to kill broken plugin");
                }
                Err(err)
            }
        }
    }

    async fn exchange(
        &self,
        id: u64,
        request: Request,
        reply: oneshot::Receiver<Response>,
    ) -> PluginResult<Response> {
        let mut line = serde_json::to_vec(&Call { id, request })
            .map_err(|e| PluginError::Protocol(e.to_string()))?;
        line.push(b'\n');

        {
            let mut writer = self.writer.lock().await;
            let Some(writer) = writer.as_mut() else {
                return Err(PluginError::Broken(self.name.clone()));
            };
            writer
                .write_all(&line)
                .await
                .map_err(|e| PluginError::Transport(e.to_string()))?;
            writer
                .flush()
                .await
                .map_err(|e| PluginError::Transport(e.to_string()))?;
        }

        reply
            .await
            .map_err(|_| PluginError::Transport("plugin closed its output".to_string()))
    }

    fn unexpected(&self, resp: &Response) -> PluginError {
        PluginError::Protocol(format!(
            "plugin {} answered with an unexpected response: {resp:?}",
            self.name
        ))
    }
}

impl Drop for ProcessPlugin {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl std::fmt::Debug for ProcessPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessPlugin")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("path", &self.path)
            .finish()
    }
}

#[async_trait]
impl FetchPlugin for ProcessPlugin {
    async fn fetch(&self, host: &str) -> PluginResult<FetchResult> {
        match self.call(Request::Fetch { host: host.to_string() }).await? {
            Response::Fetch(res) => Ok(res),
            other => Err(self.unexpected(&other)),
        }
    }
}

#[async_trait]
impl FilterPlugin for ProcessPlugin {
    async fn filter(&self, args: &Args) -> PluginResult<FilterResult> {
        match self.call(Request::Filter { args: args.clone() }).await? {
            Response::Filter(res) => Ok(res),
            other => Err(self.unexpected(&other)),
        }
    }
}

#[async_trait]
impl ScorePlugin for ProcessPlugin {
    async fn score(&self, args: &Args) -> PluginResult<ScoreResult> {
        match self.call(Request::Score { args: args.clone() }).await? {
            Response::Score(res) => Ok(res),
            other => Err(self.unexpected(&other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::{self, ERR_REASON_NODE_NAME};
    use crate::serve::serve_io;
    use pipego_core::{Node, Task};
    use tokio::io::duplex;
    use tokio::sync::Barrier;
    use tokio::task::JoinSet;

    /// Host a plugin served in-process over a pair of pipes.
    async fn connect_in_memory(
        name: &'static str,
        handle: PluginHandle,
        config: &HostConfig,
    ) -> ProcessPlugin {
        let (host_out, plugin_in) = duplex(64 * 1024);
        let (plugin_out, host_in) = duplex(64 * 1024);
        let kind = handle.stage();

        let version = config.protocol_version;
        tokio::spawn(async move { serve_io(version, name, handle, plugin_in, plugin_out).await });

        ProcessPlugin::connect(
            PathBuf::from(name),
            name,
            kind,
            config,
            None,
            host_in,
            Box::new(host_out),
        )
        .await
        .unwrap()
    }

    struct Rendezvous(Barrier);

    #[async_trait]
    impl FilterPlugin for Rendezvous {
        async fn filter(&self, _args: &Args) -> PluginResult<FilterResult> {
            self.0.wait().await;
            Ok(FilterResult::pass())
        }
    }

    struct Stuck;

    #[async_trait]
    impl FilterPlugin for Stuck {
        async fn filter(&self, _args: &Args) -> PluginResult<FilterResult> {
            std::future::pending().await
        }
    }

    #[test]
    fn host_config_follows_host_section() {
        let spec = HostSpec {
            call_timeout_secs: 5,
            ..HostSpec::default()
        };
        let config = HostConfig::from(&spec);

        assert_eq!(config.protocol_version, 1);
        assert_eq!(config.cookie_key, "PIPEGO_PLUGIN");
        assert_eq!(config.call_timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn missing_binary_fails_to_spawn() {
        let err = ProcessPlugin::spawn(
            Path::new("/nonexistent/pipego-plugin"),
            "Missing",
            Stage::Filter,
            &HostConfig::default(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, PluginError::Spawn { .. }));
    }

    #[tokio::test]
    async fn overlapping_calls_share_one_channel() {
        let config = HostConfig {
            call_timeout: Duration::from_secs(5),
            ..HostConfig::default()
        };
        let plugin = connect_in_memory(
            "Rendezvous",
            PluginHandle::Filter(Arc::new(Rendezvous(Barrier::new(2)))),
            &config,
        )
        .await;

        // Each call only returns once the other one is in flight too.
        let args = Args::default();
        let (a, b) = tokio::join!(plugin.filter(&args), plugin.filter(&args));
        assert!(a.unwrap().is_pass());
        assert!(b.unwrap().is_pass());
        assert!(!plugin.is_broken());
    }

    #[tokio::test]
    async fn concurrent_replies_reach_their_callers() {
        let plugin = Arc::new(
            connect_in_memory(
                "NodeName",
                PluginHandle::Filter(Arc::new(builtin::NodeName)),
                &HostConfig::default(),
            )
            .await,
        );

        let mut calls = JoinSet::new();
        for i in 0..32 {
            let plugin = plugin.clone();
            calls.spawn(async move {
                let task = Task {
                    node_name: "node0".to_string(),
                    ..Task::default()
                };
                let node = Node {
                    name: format!("node{}", i % 2),
                    ..Node::default()
                };
                let res = plugin.filter(&Args::new(&task, &node)).await.unwrap();
                (i, res)
            });
        }

        while let Some(joined) = calls.join_next().await {
            let (i, res) = joined.unwrap();
            if i % 2 == 0 {
                assert!(res.is_pass(), "call {i} got {res:?}");
            } else {
                assert_eq!(res.error, ERR_REASON_NODE_NAME, "call {i}");
            }
        }
    }

    #[tokio::test]
    async fn timed_out_call_breaks_the_channel() {
        let config = HostConfig {
            call_timeout: Duration::from_millis(100),
            ..HostConfig::default()
        };
        let plugin =
            connect_in_memory("Stuck", PluginHandle::Filter(Arc::new(Stuck)), &config).await;

        let err = plugin.filter(&Args::default()).await.unwrap_err();
        assert!(matches!(err, PluginError::Timeout(_)), "got {err:?}");
        assert!(plugin.is_broken());

        let err = plugin.filter(&Args::default()).await.unwrap_err();
        assert!(matches!(err, PluginError::Broken(name) if name == "Stuck"));
    }

    #[tokio::test]
    async fn plugin_errors_leave_the_channel_usable() {
        let plugin = connect_in_memory(
            "LocalHost",
            PluginHandle::Fetch(Arc::new(builtin::LocalHost)),
            &HostConfig::default(),
        )
        .await;

        // A fetch plugin cannot answer a filter call.
        let err = plugin.filter(&Args::default()).await.unwrap_err();
        assert!(matches!(err, PluginError::Protocol(_)), "got {err:?}");
        assert!(!plugin.is_broken());

        assert!(plugin.fetch("127.0.0.1").await.is_ok());
    }
}
