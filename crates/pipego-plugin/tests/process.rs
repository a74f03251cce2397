//! Subprocess plugins over the shipped plugin binaries.

use std::path::Path;
use std::sync::Arc;

use pipego_core::config::Enabled;
use pipego_core::{Node, Resource, SchedulerConfig, Stage, Task};
use pipego_plugin::builtin::ERR_REASON_NODE_NAME;
use pipego_plugin::{
    FetchPlugin, FilterPlugin, HostConfig, PluginError, PluginExecutor, PluginManager,
    ProcessPlugin, Registry,
};

const FILTER_NODENAME: &str = env!("CARGO_BIN_EXE_filter-nodename");
const FETCH_LOCALHOST: &str = env!("CARGO_BIN_EXE_fetch-localhost");
const SCORE_BALANCED: &str = env!("CARGO_BIN_EXE_score-noderesourcesbalancedallocation");

fn pinned_task(node: &str) -> Task {
    Task {
        name: "task1".to_string(),
        node_name: node.to_string(),
        ..Task::default()
    }
}

fn node(name: &str) -> Node {
    Node {
        name: name.to_string(),
        host: "127.0.0.1".to_string(),
        ..Node::default()
    }
}

#[tokio::test]
async fn filter_process_answers_requests() {
    let plugin = ProcessPlugin::spawn(
        Path::new(FILTER_NODENAME),
        "NodeName",
        Stage::Filter,
        &HostConfig::default(),
    )
    .await
    .unwrap();

    let args = pipego_core::Args::new(&pinned_task("node1"), &node("node1"));
    assert!(plugin.filter(&args).await.unwrap().is_pass());

    let args = pipego_core::Args::new(&pinned_task("node2"), &node("node1"));
    let res = plugin.filter(&args).await.unwrap();
    assert_eq!(res.error, ERR_REASON_NODE_NAME);

    plugin.kill().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn filter_process_answers_overlapping_calls() {
    let plugin = Arc::new(
        ProcessPlugin::spawn(
            Path::new(FILTER_NODENAME),
            "NodeName",
            Stage::Filter,
            &HostConfig::default(),
        )
        .await
        .unwrap(),
    );

    let mut calls = tokio::task::JoinSet::new();
    for i in 0..16 {
        let plugin = plugin.clone();
        calls.spawn(async move {
            let args = pipego_core::Args::new(&pinned_task("node0"), &node(&format!("node{}", i % 2)));
            (i, plugin.filter(&args).await.unwrap())
        });
    }

    while let Some(joined) = calls.join_next().await {
        let (i, res) = joined.unwrap();
        assert_eq!(res.is_pass(), i % 2 == 0, "call {i} got {res:?}");
    }

    plugin.kill().await.unwrap();
}

#[tokio::test]
async fn fetch_process_reports_local_capacity() {
    let plugin = ProcessPlugin::spawn(
        Path::new(FETCH_LOCALHOST),
        "LocalHost",
        Stage::Fetch,
        &HostConfig::default(),
    )
    .await
    .unwrap();

    let res = plugin.fetch("127.0.0.1").await.unwrap();
    assert!(res.allocatable_resource.milli_cpu >= 1000);
    assert!(plugin.fetch("10.1.2.3").await.unwrap().is_empty());
}

#[tokio::test]
async fn wrong_cookie_fails_handshake() {
    let config = HostConfig {
        cookie_value: "not-the-cookie".to_string(),
        ..HostConfig::default()
    };

    let err = ProcessPlugin::spawn(Path::new(FILTER_NODENAME), "NodeName", Stage::Filter, &config)
        .await
        .unwrap_err();
    assert!(matches!(err, PluginError::Handshake(_)), "got {err:?}");
}

#[tokio::test]
async fn wrong_kind_or_name_fails_handshake() {
    let config = HostConfig::default();

    let err = ProcessPlugin::spawn(Path::new(FILTER_NODENAME), "NodeName", Stage::Score, &config)
        .await
        .unwrap_err();
    assert!(matches!(err, PluginError::Handshake(_)), "got {err:?}");

    let err = ProcessPlugin::spawn(Path::new(FILTER_NODENAME), "Other", Stage::Filter, &config)
        .await
        .unwrap_err();
    assert!(matches!(err, PluginError::Handshake(_)), "got {err:?}");
}

#[tokio::test]
async fn protocol_version_must_match() {
    let config = HostConfig {
        protocol_version: 2,
        ..HostConfig::default()
    };

    let err = ProcessPlugin::spawn(Path::new(FILTER_NODENAME), "NodeName", Stage::Filter, &config)
        .await
        .unwrap_err();
    assert!(matches!(err, PluginError::Handshake(_)), "got {err:?}");
}

#[tokio::test]
async fn killed_process_is_broken() {
    let plugin = ProcessPlugin::spawn(
        Path::new(FILTER_NODENAME),
        "NodeName",
        Stage::Filter,
        &HostConfig::default(),
    )
    .await
    .unwrap();

    plugin.kill().await.unwrap();
    assert!(plugin.is_broken());

    let args = pipego_core::Args::new(&Task::default(), &node("node1"));
    let err = plugin.filter(&args).await.unwrap_err();
    assert!(matches!(err, PluginError::Broken(name) if name == "NodeName"));
}

#[tokio::test]
async fn manager_hosts_file_plugins() {
    let mut config = SchedulerConfig::default();
    config.spec.score.enabled = vec![Enabled::new(
        "NodeResourcesBalancedAllocation",
        SCORE_BALANCED,
    )];
    config.spec.filter.enabled = vec![Enabled::new(
        "NodeName",
        format!("file://{FILTER_NODENAME}"),
    )];

    let manager = PluginManager::new(&config, Registry::new());
    manager.init().await.unwrap();

    let task = Task {
        requested_resource: Resource::new(2000, 4 << 30, 0),
        ..Task::default()
    };
    let node = Node {
        allocatable_resource: Resource::new(4000, 8 << 30, 0),
        ..node("node1")
    };

    let res = manager
        .run_score("NodeResourcesBalancedAllocation", &task, &node)
        .await
        .unwrap();
    assert_eq!(res.score, 100);

    let res = manager.run_filter("NodeName", &task, &node).await.unwrap();
    assert!(res.is_pass());

    manager.deinit().await.unwrap();
}
