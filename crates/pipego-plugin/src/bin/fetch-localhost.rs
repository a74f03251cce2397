use std::process::ExitCode;
use std::sync::Arc;

use pipego_plugin::builtin::LocalHost;
use pipego_plugin::{HostConfig, PluginHandle, serve};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let handle = PluginHandle::Fetch(Arc::new(LocalHost));

    match serve(&HostConfig::default(), "LocalHost", handle).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("fetch-localhost: {e}");
            ExitCode::FAILURE
        }
    }
}
