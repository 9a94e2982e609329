//! End-to-end engine scenarios against a scripted delegate.
//!
//! Each test builds a temp project, runs one entry point of the engine, and
//! checks the persisted feature list, execution logs, and emitted events.

use std::sync::Arc;
use std::time::Duration;

use factory::error::AlreadyRunningError;
use factory::events::FactoryEvent;
use factory::feature::FeatureStatus;
use factory::io::execution_log;
use factory::registry::ExecutionRegistry;
use factory::test_support::{
    RecordingSink, ScriptStep, ScriptedProvider, TestProject, feature, wait_until,
};

fn kinds(events: &[FactoryEvent]) -> Vec<&'static str> {
    events
        .iter()
        .map(|event| match event {
            FactoryEvent::FeatureStart { .. } => "feature_start",
            FactoryEvent::Phase { .. } => "phase",
            FactoryEvent::Progress { .. } => "progress",
            FactoryEvent::ToolUse { .. } => "tool_use",
            FactoryEvent::FeatureComplete { .. } => "feature_complete",
            FactoryEvent::LoopComplete { .. } => "loop_complete",
            FactoryEvent::Error { .. } => "error",
        })
        .collect()
}

#[tokio::test]
async fn delegate_verifying_the_feature_passes_and_clears_its_log() {
    let project =
        TestProject::with_features(vec![feature("f1", FeatureStatus::Backlog)]).expect("project");
    let provider = Arc::new(ScriptedProvider::new(vec![vec![
        ScriptStep::text("implemented step a"),
        ScriptStep::SetStatus(FeatureStatus::Verified),
    ]]));
    let sink = Arc::new(RecordingSink::new());
    let engine = project.engine(provider.clone(), sink.clone());

    let outcome = engine.run_feature("f1").await.expect("run");

    assert!(outcome.success);
    assert!(outcome.passes);
    assert_eq!(outcome.status, FeatureStatus::Verified);
    assert_eq!(project.status_of("f1").expect("status"), FeatureStatus::Verified);
    assert!(!execution_log::exists(project.paths(), "f1").await);
    assert!(engine.registry().is_empty());

    let events = sink.events();
    assert_eq!(kinds(&events).first(), Some(&"feature_start"));
    assert_eq!(kinds(&events).last(), Some(&"feature_complete"));
}

#[tokio::test]
async fn delegate_output_after_verifying_leaves_no_log() {
    let project =
        TestProject::with_features(vec![feature("f1", FeatureStatus::Backlog)]).expect("project");
    let provider = Arc::new(ScriptedProvider::new(vec![vec![
        ScriptStep::text("implemented"),
        ScriptStep::SetStatus(FeatureStatus::Verified),
        ScriptStep::text("Marked the feature verified."),
    ]]));
    let engine = project.engine(provider, Arc::new(RecordingSink::new()));

    let outcome = engine.run_feature("f1").await.expect("run");

    assert!(outcome.passes);
    assert_eq!(outcome.status, FeatureStatus::Verified);
    assert_eq!(execution_log::read(project.paths(), "f1").await, None);
}

#[tokio::test]
async fn delegate_without_status_call_leaves_backlog_and_keeps_log() {
    let project =
        TestProject::with_features(vec![feature("f1", FeatureStatus::Backlog)]).expect("project");
    let provider = Arc::new(ScriptedProvider::new(vec![vec![ScriptStep::text(
        "I think this is done.",
    )]]));
    let engine = project.engine(provider, Arc::new(RecordingSink::new()));

    let outcome = engine.run_feature("f1").await.expect("run");

    assert!(outcome.success);
    assert!(!outcome.passes);
    assert_eq!(outcome.message, "I think this is done.");
    assert_eq!(project.status_of("f1").expect("status"), FeatureStatus::Backlog);
    assert_eq!(
        execution_log::read(project.paths(), "f1").await.as_deref(),
        Some("I think this is done.")
    );
}

#[tokio::test]
async fn failed_verification_stays_in_progress() {
    let project =
        TestProject::with_features(vec![feature("f1", FeatureStatus::InProgress)]).expect("project");
    let provider = Arc::new(ScriptedProvider::new(vec![vec![ScriptStep::text(
        "step 1 is broken",
    )]]));
    let engine = project.engine(provider, Arc::new(RecordingSink::new()));

    let outcome = engine.verify_feature("f1").await.expect("verify");

    assert!(!outcome.passes);
    assert_eq!(project.status_of("f1").expect("status"), FeatureStatus::InProgress);
}

#[tokio::test]
async fn resume_of_a_stalled_feature_makes_four_attempts() {
    let project =
        TestProject::with_features(vec![feature("f1", FeatureStatus::InProgress)]).expect("project");
    execution_log::append(project.paths(), "f1", "previous session")
        .await
        .expect("seed log");
    let provider = Arc::new(
        ScriptedProvider::default().with_default_turn(vec![ScriptStep::text("still working")]),
    );
    let engine = project.engine(provider.clone(), Arc::new(RecordingSink::new()));

    let outcome = engine.resume_feature("f1").await.expect("resume");

    assert_eq!(provider.calls(), 4);
    assert!(outcome.success);
    assert!(!outcome.passes);
    assert_eq!(project.status_of("f1").expect("status"), FeatureStatus::InProgress);
    let log = execution_log::read(project.paths(), "f1").await.expect("log");
    assert!(log.starts_with("previous session"));
    assert_eq!(log.matches("still working").count(), 4);
}

#[tokio::test]
async fn concurrent_runs_on_one_feature_are_rejected() {
    let project =
        TestProject::with_features(vec![feature("f1", FeatureStatus::Backlog)]).expect("project");
    let provider = Arc::new(ScriptedProvider::new(vec![vec![ScriptStep::Hang]]));
    let sink = Arc::new(RecordingSink::new());
    let engine = project.engine(provider.clone(), sink.clone());

    let first = tokio::spawn({
        let engine = engine.clone();
        async move { engine.run_feature("f1").await }
    });
    let registry = engine.registry().clone();
    assert!(
        wait_until(Duration::from_secs(2), || {
            registry.get("f1").is_some_and(|execution| execution.stream_active)
        })
        .await
    );

    let before = project.status_of("f1").expect("status");
    assert_eq!(before, FeatureStatus::InProgress);
    let rejected = [
        engine.run_feature("f1").await,
        engine.verify_feature("f1").await,
        engine.resume_feature("f1").await,
    ];
    for result in rejected {
        let err = result.unwrap_err();
        let busy = err.downcast_ref::<AlreadyRunningError>().expect("already running");
        assert_eq!(busy.feature_id, "f1");
        assert!(matches!(
            sink.events().last(),
            Some(FactoryEvent::Error { feature_id: Some(id), .. }) if id == "f1"
        ));
        assert_eq!(project.status_of("f1").expect("status"), before);
    }
    assert_eq!(provider.calls(), 1);

    assert!(
        wait_until(Duration::from_secs(2), || engine.stop_feature("f1")).await,
        "first run reached its delegate call"
    );
    let outcome = first.await.expect("join").expect("first run");
    assert!(!outcome.success);
    assert_eq!(provider.calls(), 1);
    assert!(engine.registry().is_empty());
}

#[tokio::test]
async fn loop_on_missing_feature_list_completes_immediately() {
    let project = TestProject::new().expect("project");
    std::fs::remove_file(&project.paths().feature_list_path).expect("remove list");
    let provider = Arc::new(ScriptedProvider::default());
    let sink = Arc::new(RecordingSink::new());
    let engine = project.engine(provider.clone(), sink.clone());

    engine.start_loop().expect("start").join().await.expect("join");

    assert_eq!(kinds(&sink.events()), vec!["loop_complete"]);
    assert_eq!(provider.calls(), 0);
    assert!(!engine.status().loop_running);
}

#[tokio::test]
async fn loop_works_through_features_in_file_order() {
    let project = TestProject::with_features(vec![
        feature("a", FeatureStatus::Verified),
        feature("b", FeatureStatus::Backlog),
        feature("c", FeatureStatus::InProgress),
    ])
    .expect("project");
    let provider = Arc::new(
        ScriptedProvider::default()
            .with_default_turn(vec![ScriptStep::SetStatus(FeatureStatus::Verified)]),
    );
    let sink = Arc::new(RecordingSink::new());
    let engine = project.engine(provider.clone(), sink.clone());

    engine.start_loop().expect("start").join().await.expect("join");

    let order: Vec<String> = provider
        .requests()
        .iter()
        .map(|request| request.status_tool.feature_id().to_string())
        .collect();
    assert_eq!(order, vec!["b".to_string(), "c".to_string()]);
    for feature in project.read_features().expect("features") {
        assert_eq!(feature.status, FeatureStatus::Verified);
    }
    assert_eq!(kinds(&sink.events()).last(), Some(&"loop_complete"));
}

#[tokio::test]
async fn stopping_the_loop_cancels_and_empties_the_registry() {
    let project = TestProject::with_features(vec![
        feature("f1", FeatureStatus::Backlog),
        feature("f2", FeatureStatus::Backlog),
    ])
    .expect("project");
    let provider = Arc::new(ScriptedProvider::default().with_default_turn(vec![ScriptStep::Hang]));
    let engine = project.engine(provider.clone(), Arc::new(RecordingSink::new()));

    let handle = engine.start_loop().expect("start");
    let registry = engine.registry().clone();
    assert!(
        wait_until(Duration::from_secs(2), || {
            registry.get("f1").is_some_and(|execution| execution.stream_active)
        })
        .await
    );

    assert!(engine.stop_loop());
    assert!(engine.registry().is_empty());
    handle.join().await.expect("join");

    let status = engine.status();
    assert!(!status.loop_running);
    assert!(status.running_features.is_empty());
    assert_eq!(provider.calls(), 1);
    assert_eq!(project.status_of("f1").expect("status"), FeatureStatus::Backlog);
    assert_eq!(project.status_of("f2").expect("status"), FeatureStatus::Backlog);
}

#[tokio::test]
async fn stopped_loop_execution_leaves_status_to_the_next_run() {
    let project =
        TestProject::with_features(vec![feature("f1", FeatureStatus::Backlog)]).expect("project");
    let provider = Arc::new(ScriptedProvider::default().with_default_turn(vec![ScriptStep::Hang]));
    let engine = project.engine(provider.clone(), Arc::new(RecordingSink::new()));
    let registry = engine.registry().clone();
    let streaming = |registry: &ExecutionRegistry| {
        registry.get("f1").is_some_and(|execution| execution.stream_active)
    };

    let handle = engine.start_loop().expect("start");
    assert!(wait_until(Duration::from_secs(2), || streaming(&registry)).await);
    engine.stop_loop();

    let direct = tokio::spawn({
        let engine = engine.clone();
        async move { engine.run_feature("f1").await }
    });
    assert!(wait_until(Duration::from_secs(2), || streaming(&registry)).await);
    handle.join().await.expect("join loop");

    assert_eq!(project.status_of("f1").expect("status"), FeatureStatus::InProgress);
    assert_eq!(provider.calls(), 2);

    assert!(engine.stop_feature("f1"));
    let outcome = direct.await.expect("join").expect("direct run");
    assert!(!outcome.success);
    assert_eq!(project.status_of("f1").expect("status"), FeatureStatus::Backlog);
}
