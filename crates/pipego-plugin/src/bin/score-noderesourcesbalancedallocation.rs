use std::process::ExitCode;
use std::sync::Arc;

use pipego_plugin::builtin::NodeResourcesBalancedAllocation;
use pipego_plugin::{HostConfig, PluginHandle, serve};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let handle = PluginHandle::Score(Arc::new(NodeResourcesBalancedAllocation));

    match serve(&HostConfig::default(), "NodeResourcesBalancedAllocation", handle).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("score-noderesourcesbalancedallocation: {e}");
            ExitCode::FAILURE
        }
    }
}
