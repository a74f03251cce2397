use std::process::ExitCode;
use std::sync::Arc;

use pipego_plugin::builtin::NodeResourcesFit;
use pipego_plugin::{HostConfig, PluginHandle, serve};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let handle = PluginHandle::Score(Arc::new(NodeResourcesFit));

    match serve(&HostConfig::default(), "NodeResourcesFit", handle).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("score-noderesourcesfit: {e}");
            ExitCode::FAILURE
        }
    }
}
