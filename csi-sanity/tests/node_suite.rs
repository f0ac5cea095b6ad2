//! The full node suite against differently configured mock plugins.

use std::sync::Arc;

use csi_sanity::scenarios::FullLifecycle;
use csi_sanity::{
    FailureKind, Outcome, PluginClients, SanityConfig, ScenarioRunner, SuiteReport, node_suite,
};
use libcsi::backend::mock::{Faults, MockConfig, MockPlugin};

fn runner(plugin: &Arc<MockPlugin>, dir: &tempfile::TempDir) -> ScenarioRunner {
    let config = SanityConfig::new(
        dir.path().join("staging").to_string_lossy().into_owned(),
        dir.path().join("target").to_string_lossy().into_owned(),
    );
    ScenarioRunner::new(
        PluginClients::from_plugin(Arc::clone(plugin)),
        Arc::new(config),
    )
}

async fn run_suite(config: MockConfig) -> (Arc<MockPlugin>, SuiteReport) {
    let dir = tempfile::tempdir().unwrap();
    let plugin = Arc::new(MockPlugin::new(config));
    let report = runner(&plugin, &dir).run_all(&node_suite()).await;
    (plugin, report)
}

fn failure_kind(report: &SuiteReport, name: &str) -> Option<FailureKind> {
    match &report.get(name)?.outcome {
        Outcome::Failed(e) => Some(e.kind()),
        _ => None,
    }
}

#[tokio::test]
async fn conforming_plugin_passes_everything() {
    let (plugin, report) = run_suite(MockConfig::default()).await;

    for scenario in &report.scenarios {
        assert!(
            matches!(scenario.outcome, Outcome::Passed),
            "{}: {:?}",
            scenario.name,
            scenario.outcome
        );
    }
    assert_eq!(report.passed(), node_suite().len());
    assert_eq!(report.leaked(), 0);
    assert_eq!(plugin.volume_count(), 0);
}

#[tokio::test]
async fn optional_scenarios_skip_on_a_minimal_plugin() {
    let (plugin, report) = run_suite(MockConfig {
        controller_publish: false,
        node_stage: false,
        volume_stats: false,
        ..Default::default()
    })
    .await;

    assert!(report.is_success());
    assert_eq!(report.skipped(), 9);
    assert_eq!(report.passed(), 8);
    assert!(matches!(
        report.get("sanity-node-full").unwrap().outcome,
        Outcome::Passed
    ));
    match &report.get("node-stage-no-volume-id").unwrap().outcome {
        Outcome::Skipped(reason) => assert!(reason.contains("NodeStageVolume")),
        other => panic!("expected skip, got {other:?}"),
    }
    assert_eq!(plugin.volume_count(), 0);
}

#[tokio::test]
async fn lax_validation_is_reported() {
    let (plugin, report) = run_suite(MockConfig {
        faults: Faults {
            skip_validation: true,
            ..Default::default()
        },
        ..Default::default()
    })
    .await;

    // A real, attached volume: staging without a capability goes through.
    assert_eq!(
        failure_kind(&report, "node-stage-no-volume-capability"),
        Some(FailureKind::UnexpectedSuccess)
    );
    // Placeholder ids fall through to the lookup, which answers NOT_FOUND.
    for name in [
        "node-publish-no-volume-capability",
        "node-unstage-no-staging-path",
        "node-stats-no-volume-id",
    ] {
        assert_eq!(
            failure_kind(&report, name),
            Some(FailureKind::ProtocolViolation),
            "{name}"
        );
    }
    assert!(matches!(
        report.get("sanity-node-full").unwrap().outcome,
        Outcome::Passed
    ));
    assert_eq!(plugin.volume_count(), 0);
}

#[tokio::test]
async fn stats_for_any_path_is_caught() {
    let (plugin, report) = run_suite(MockConfig {
        faults: Faults {
            ignore_volume_path: true,
            ..Default::default()
        },
        ..Default::default()
    })
    .await;

    assert_eq!(
        failure_kind(&report, "node-stats-wrong-path"),
        Some(FailureKind::UnexpectedSuccess)
    );
    assert_eq!(report.failed(), 1);
    assert_eq!(plugin.volume_count(), 0);
}

#[tokio::test]
async fn unpublish_failure_is_fatal_but_the_rest_is_released() {
    let dir = tempfile::tempdir().unwrap();
    let plugin = Arc::new(MockPlugin::new(MockConfig {
        faults: Faults {
            fail_node_unpublish: true,
            ..Default::default()
        },
        ..Default::default()
    }));

    let report = runner(&plugin, &dir).run(&FullLifecycle).await;
    match &report.outcome {
        Outcome::Failed(e) => assert_eq!(e.call(), "NodeUnpublishVolume"),
        other => panic!("expected failure, got {other:?}"),
    }
    // Teardown retries the unpublish, fails again and reports it.
    assert_eq!(report.teardown.len(), 1);
    assert_eq!(plugin.volume_count(), 0);

    let calls = plugin.calls();
    let tail: Vec<_> = calls
        .iter()
        .rev()
        .take(3)
        .filter_map(|c| c.split(' ').next())
        .collect();
    assert_eq!(
        tail,
        ["DeleteVolume", "ControllerUnpublishVolume", "NodeUnstageVolume"]
    );
}
