//! Re-activation integration tests

use livecell_core::{
    identify, CellId, CellManager, HostSurfaceModeEvents, ManagerConfig, ReactivationController,
    RenderContext, SurfaceId, SurfaceMode,
};
use livecell_runtime::RuntimeKind;
use livecell_test_utils::{
    init_tracing, wait_until, RecordingInputSurface, ScriptedRuntime, StaticFetcher,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;

fn setup(runtime: ScriptedRuntime) -> (CellManager, Arc<ScriptedRuntime>) {
    init_tracing();
    let manager = CellManager::new(
        ManagerConfig::default(),
        Arc::new(StaticFetcher::new()),
        Arc::new(RecordingInputSurface::new()),
    );
    let runtime = Arc::new(runtime);
    manager.register_runtime(runtime.clone());
    (manager, runtime)
}

fn python() -> RuntimeKind {
    RuntimeKind::new("python")
}

fn mount(manager: &CellManager, surface: &str, text: &str, position: usize) -> CellId {
    manager
        .on_fenced_block("python", text, position, &RenderContext::rendered(surface))
        .map(|m| m.id)
        .unwrap()
}

#[tokio::test]
async fn rendered_surface_rebinds_its_cells() {
    let (manager, _) = setup(ScriptedRuntime::python());
    let a = mount(&manager, "m1", "print(1)", 0);
    let b = mount(&manager, "m1", "print(2)", 1);
    let other = mount(&manager, "m2", "print(3)", 0);
    let controller = ReactivationController::new(manager.clone());

    let report = controller.on_host_mode_changed("m1".into(), SurfaceMode::Rendered);
    assert_eq!(report.rebound, vec![a, b]);
    assert_eq!(manager.state(a).unwrap().bind_generation, 2);
    assert_eq!(manager.state(other).unwrap().bind_generation, 1);
    assert_eq!(controller.mode(&"m1".into()), Some(SurfaceMode::Rendered));
}

#[tokio::test]
async fn only_transitions_into_rendered_act() {
    let (manager, _) = setup(ScriptedRuntime::python());
    let id = mount(&manager, "m1", "print(1)", 0);
    let controller = ReactivationController::new(manager.clone());
    let surface = SurfaceId::new("m1");

    assert!(controller
        .on_host_mode_changed(surface.clone(), SurfaceMode::Streaming)
        .is_empty());
    assert!(!controller
        .on_host_mode_changed(surface.clone(), SurfaceMode::Rendered)
        .is_empty());
    assert!(controller
        .on_host_mode_changed(surface.clone(), SurfaceMode::Rendered)
        .is_empty());
    assert!(controller
        .on_host_mode_changed(surface.clone(), SurfaceMode::Source)
        .is_empty());
    let report = controller.on_host_mode_changed(surface, SurfaceMode::Rendered);
    assert_eq!(report.rebound, vec![id]);
    assert_eq!(manager.state(id).unwrap().bind_generation, 3);
}

#[tokio::test]
async fn unknown_surface_reports_nothing() {
    let (manager, _) = setup(ScriptedRuntime::python());
    mount(&manager, "m1", "print(1)", 0);
    let controller = ReactivationController::new(manager);
    let report = controller.on_host_mode_changed("elsewhere".into(), SurfaceMode::Rendered);
    assert!(report.is_empty());
}

#[tokio::test]
async fn controller_activates_pending_cell() {
    let (manager, runtime) = setup(ScriptedRuntime::python());
    manager.ensure_ready(&python()).await.unwrap();
    let controller = ReactivationController::new(manager.clone());

    // claimed here before the spawned activation gets polled
    let id = mount(&manager, "m1", "#%autorun\nprint(5)", 0);
    let report = controller.on_host_mode_changed("m1".into(), SurfaceMode::Rendered);
    assert_eq!(report.activated, vec![id]);

    manager.settle().await;
    assert!(wait_until(|| runtime.run_count() == 1).await);
    manager.settle().await;
    assert_eq!(runtime.run_count(), 1);
    assert!(manager.state(id).unwrap().flags.autorun_consumed());
}

#[tokio::test]
async fn loading_runtime_defers_activation() {
    let (manager, runtime) = setup(ScriptedRuntime::python().held());
    let controller = ReactivationController::new(manager.clone());
    let id = mount(&manager, "m1", "#%autorun\nprint(5)", 0);

    let report = controller.on_host_mode_changed("m1".into(), SurfaceMode::Rendered);
    assert_eq!(report.rebound, vec![id]);
    assert!(report.activated.is_empty());
    assert!(!manager.registry().processed().contains(&id));

    runtime.release_bootstrap();
    manager.ensure_ready(&python()).await.unwrap();
    controller.on_host_mode_changed("m1".into(), SurfaceMode::Source);
    controller.on_host_mode_changed("m1".into(), SurfaceMode::Rendered);

    assert!(wait_until(|| runtime.run_count() == 1).await);
    manager.settle().await;
    assert_eq!(runtime.run_count(), 1);
}

#[tokio::test]
async fn held_template_fetch_does_not_block_mode_changes() {
    init_tracing();
    let fetcher = StaticFetcher::new()
        .with("http://localhost/static/t.py", "#%autorun\nprint(7)")
        .held()
        .into_arc();
    let manager = CellManager::new(
        ManagerConfig::default(),
        fetcher.clone(),
        Arc::new(RecordingInputSurface::new()),
    );
    let runtime = Arc::new(ScriptedRuntime::python());
    manager.register_runtime(runtime.clone());
    manager.ensure_ready(&python()).await.unwrap();
    let controller = ReactivationController::new(manager.clone());

    let id = mount(&manager, "m1", "#%load=\"/static/t.py\"", 0);
    let report = controller.on_host_mode_changed("m1".into(), SurfaceMode::Rendered);
    assert_eq!(report.activated, vec![id]);
    assert!(wait_until(|| fetcher.fetches() == 1).await);

    // fetch still pending
    controller.on_host_mode_changed("m1".into(), SurfaceMode::Source);
    let report = controller.on_host_mode_changed("m1".into(), SurfaceMode::Rendered);
    assert_eq!(report.rebound, vec![id]);
    assert!(report.activated.is_empty());
    assert_eq!(manager.state(id).unwrap().bind_generation, 3);
    assert_eq!(runtime.run_count(), 0);

    fetcher.release(1);
    assert!(wait_until(|| runtime.run_count() == 1).await);
    manager.settle().await;
    assert!(manager.state(id).unwrap().editable_text.contains("print(7)"));
}

#[tokio::test]
async fn spawned_controller_follows_host_events() {
    let (manager, _) = setup(ScriptedRuntime::python());
    let id = mount(&manager, "m1", "print(1)", 0);
    let events = HostSurfaceModeEvents::new(16);
    let controller = Arc::new(ReactivationController::new(manager.clone()));
    let task = Arc::clone(&controller).spawn(events.subscribe());

    assert_eq!(events.publish("m1", SurfaceMode::Rendered), 1);
    assert!(wait_until(|| manager.state(id).is_some_and(|s| s.bind_generation == 2)).await);

    drop(events);
    task.await.unwrap();
    assert_eq!(controller.mode(&"m1".into()), Some(SurfaceMode::Rendered));
}

#[derive(Debug, Clone)]
enum Op {
    Mount(usize),
    Mode(SurfaceMode),
    Release,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0usize..4).prop_map(Op::Mount),
        2 => prop_oneof![
            Just(SurfaceMode::Rendered),
            Just(SurfaceMode::Source),
            Just(SurfaceMode::Streaming),
        ]
        .prop_map(Op::Mode),
        1 => Just(Op::Release),
    ]
}

fn block(i: usize) -> String {
    format!("#%autorun\nprint({i})")
}

async fn replay(ops: Vec<Op>) -> (Vec<String>, BTreeSet<String>) {
    let (manager, runtime) = setup(ScriptedRuntime::python().held());
    let controller = ReactivationController::new(manager.clone());
    let mut mounted = BTreeSet::new();

    for op in ops {
        match op {
            Op::Mount(i) => {
                mount(&manager, "m1", &block(i), i);
                mounted.insert(i);
            }
            Op::Mode(mode) => {
                controller.on_host_mode_changed("m1".into(), mode);
            }
            Op::Release => runtime.release_bootstrap(),
        }
    }

    runtime.release_bootstrap();
    manager.ensure_ready(&python()).await.unwrap();
    for i in &mounted {
        let id = identify(&block(*i), *i);
        let done = wait_until(|| {
            manager
                .state(id)
                .is_some_and(|s| s.run_status.is_terminal())
        })
        .await;
        assert!(done);
    }
    manager.settle().await;

    let expected = mounted.iter().map(|i| block(*i)).collect();
    (runtime.runs(), expected)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn autorun_fires_once_per_cell(ops in prop::collection::vec(op(), 1..16)) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let (mut runs, expected) = rt.block_on(replay(ops));

        runs.sort();
        let unique: BTreeSet<String> = runs.iter().cloned().collect();
        prop_assert_eq!(runs.len(), unique.len());
        prop_assert_eq!(unique, expected);
    }
}
