use std::process::ExitCode;
use std::sync::Arc;

use pipego_plugin::builtin::NodeAffinity;
use pipego_plugin::{HostConfig, PluginHandle, serve};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let handle = PluginHandle::Filter(Arc::new(NodeAffinity));

    match serve(&HostConfig::default(), "NodeAffinity", handle).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("filter-nodeaffinity: {e}");
            ExitCode::FAILURE
        }
    }
}
