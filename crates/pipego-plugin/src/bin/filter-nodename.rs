use std::process::ExitCode;
use std::sync::Arc;

use pipego_plugin::builtin::NodeName;
use pipego_plugin::{HostConfig, PluginHandle, serve};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let handle = PluginHandle::Filter(Arc::new(NodeName));

    match serve(&HostConfig::default(), "NodeName", handle).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("filter-nodename: {e}");
            ExitCode::FAILURE
        }
    }
}
