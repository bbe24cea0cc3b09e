//! End-to-end pipeline tests against an in-memory directory tree.
//!
//! These tests drive the runner exactly the way the host does: translated
//! watch events in, alarm ticks at chosen instants, child exits collected by
//! pid. Actions record their invocations instead of spawning anything.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, Instant};

use mirrorsync::pipeline::{
    Action, OriginConfig, OriginRegistry, Phase, Pid, Runner, StartupAction,
};
use mirrorsync_types::{CollapseTable, ConfigError, EventKind};
use mirrorsync_watcher::{WatchEvent, WatchId, WatchRegistrar};

/// In-memory directory tree standing in for the watch backend.
struct FakeTree {
    dirs: HashSet<PathBuf>,
    fail: HashSet<PathBuf>,
    map: HashMap<PathBuf, WatchId>,
    next: WatchId,
}

impl FakeTree {
    fn new(dirs: &[&str]) -> Self {
        FakeTree {
            dirs: dirs.iter().map(PathBuf::from).collect(),
            fail: HashSet::new(),
            map: HashMap::new(),
            next: 1,
        }
    }

    fn fail_on(mut self, dir: &str) -> Self {
        self.fail.insert(PathBuf::from(dir));
        self
    }

    fn add_dir(&mut self, dir: &str) {
        self.dirs.insert(PathBuf::from(dir));
    }

    fn wd_of(&self, dir: &str) -> WatchId {
        self.map[Path::new(dir)]
    }

    fn watch_count(&self) -> usize {
        self.map.len()
    }
}

impl WatchRegistrar for FakeTree {
    fn add_watch(&mut self, abs: &Path) -> Option<WatchId> {
        if self.fail.contains(abs) || !self.dirs.contains(abs) {
            return None;
        }
        if let Some(wd) = self.map.get(abs) {
            return Some(*wd);
        }
        let wd = self.next;
        self.next += 1;
        self.map.insert(abs.to_path_buf(), wd);
        Some(wd)
    }

    fn sub_dirs(&self, abs: &Path) -> Vec<String> {
        let mut names: Vec<String> = self
            .dirs
            .iter()
            .filter(|d| d.parent() == Some(abs))
            .filter_map(|d| d.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        names.sort();
        names
    }

    fn real_dir(&self, path: &Path) -> Option<PathBuf> {
        self.dirs.contains(path).then(|| path.to_path_buf())
    }
}

/// One recorded action invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Invocation {
    kind: EventKind,
    source: PathBuf,
    target: String,
}

#[derive(Clone, Default)]
struct ActionLog {
    calls: Rc<RefCell<Vec<Invocation>>>,
    next_pid: Rc<Cell<Pid>>,
}

impl ActionLog {
    fn new() -> Self {
        let log = ActionLog::default();
        log.next_pid.set(100);
        log
    }

    /// An action that records its inlet view and pretends to spawn a child.
    fn action(&self) -> Action {
        let calls = Rc::clone(&self.calls);
        let next_pid = Rc::clone(&self.next_pid);
        Box::new(move |inlet| {
            calls.borrow_mut().push(Invocation {
                kind: inlet.kind(),
                source: inlet.source_path(),
                target: inlet.target_path(),
            });
            let pid = next_pid.get();
            next_pid.set(pid + 1);
            Some(pid)
        })
    }

    fn invocations(&self) -> Vec<Invocation> {
        self.calls.borrow().clone()
    }

    fn count(&self) -> usize {
        self.calls.borrow().len()
    }

    fn last_pid(&self) -> Pid {
        self.next_pid.get() - 1
    }
}

struct ConfigSpec {
    delay: Duration,
    max_processes: usize,
    max_actions: usize,
    move_handler: bool,
    startup_pid: Option<Pid>,
}

impl Default for ConfigSpec {
    fn default() -> Self {
        ConfigSpec {
            delay: Duration::from_secs(5),
            max_processes: 1,
            max_actions: 1,
            move_handler: false,
            startup_pid: None,
        }
    }
}

fn origin_config(spec: &ConfigSpec, log: &ActionLog) -> OriginConfig {
    OriginConfig {
        delay: spec.delay,
        max_processes: spec.max_processes,
        max_actions: spec.max_actions,
        move_handler: spec.move_handler,
        collapse: CollapseTable::default(),
        action: log.action(),
        startup: spec.startup_pid.map(|pid| {
            Box::new(move |_source: &Path, _target: &str| Some(pid)) as StartupAction
        }),
    }
}

/// Build a runner over one origin and run initialization.
fn setup(tree: &mut FakeTree, source: &str, target: &str, spec: ConfigSpec) -> (Runner, ActionLog) {
    let log = ActionLog::new();
    let mut registry = OriginRegistry::new();
    registry
        .add(Path::new(source), target, origin_config(&spec, &log), tree)
        .unwrap();
    let mut runner = Runner::new(registry);
    runner.initialize(tree, Instant::now()).unwrap();
    (runner, log)
}

/// Like `setup`, but with a startup stub so no warmstart events are
/// synthesized; the runner is moved straight to the running phase.
fn setup_quiet(
    tree: &mut FakeTree,
    source: &str,
    target: &str,
    mut spec: ConfigSpec,
) -> (Runner, ActionLog) {
    spec.startup_pid = Some(9999);
    let (mut runner, log) = setup(tree, source, target, spec);
    runner.startup_complete();
    (runner, log)
}

fn ev(kind: EventKind, wd: WatchId, name: &str) -> WatchEvent {
    WatchEvent {
        kind,
        wd,
        is_dir: false,
        name: name.to_string(),
        name2: None,
    }
}

fn dir_ev(kind: EventKind, wd: WatchId, name: &str) -> WatchEvent {
    WatchEvent {
        kind,
        wd,
        is_dir: true,
        name: name.to_string(),
        name2: None,
    }
}

fn mv(wd: WatchId, name: &str, name2: &str) -> WatchEvent {
    WatchEvent {
        kind: EventKind::Move,
        wd,
        is_dir: false,
        name: name.to_string(),
        name2: Some(name2.to_string()),
    }
}

fn pending_of(runner: &Runner) -> Vec<(EventKind, String)> {
    runner
        .registry()
        .get(0)
        .delays()
        .iter_pending()
        .map(|d| (d.kind, d.path.clone()))
        .collect()
}

#[test]
fn create_then_delete_runs_nothing() {
    let mut tree = FakeTree::new(&["/src"]);
    let (mut runner, log) = setup_quiet(&mut tree, "/src", "t:/", ConfigSpec::default());
    let wd = tree.wd_of("/src");
    let t0 = Instant::now();

    runner.on_event(&mut tree, &ev(EventKind::Create, wd, "x"), t0);
    runner.on_event(&mut tree, &ev(EventKind::Delete, wd, "x"), t0);

    assert!(pending_of(&runner).is_empty());
    assert_eq!(runner.earliest_alarm(), None);

    runner.on_alarm(t0 + Duration::from_secs(60));
    assert_eq!(log.count(), 0);
}

#[test]
fn create_then_modify_fires_once_as_create() {
    let mut tree = FakeTree::new(&["/src"]);
    let (mut runner, log) = setup_quiet(&mut tree, "/src", "t:/", ConfigSpec::default());
    let wd = tree.wd_of("/src");
    let t0 = Instant::now();

    runner.on_event(&mut tree, &ev(EventKind::Create, wd, "x"), t0);
    runner.on_event(&mut tree, &ev(EventKind::Modify, wd, "x"), t0 + Duration::from_secs(1));

    // One delay, still the create, still due at the original deadline
    assert_eq!(pending_of(&runner), vec![(EventKind::Create, "x".to_string())]);
    assert_eq!(runner.earliest_alarm(), Some(t0 + Duration::from_secs(5)));

    runner.on_alarm(t0 + Duration::from_secs(5));
    assert_eq!(
        log.invocations(),
        vec![Invocation {
            kind: EventKind::Create,
            source: PathBuf::from("/src/x"),
            target: "t:/x".to_string(),
        }]
    );
}

#[test]
fn delete_then_create_fires_as_modify() {
    let mut tree = FakeTree::new(&["/src"]);
    let (mut runner, log) = setup_quiet(&mut tree, "/src", "t:/", ConfigSpec::default());
    let wd = tree.wd_of("/src");
    let t0 = Instant::now();

    runner.on_event(&mut tree, &ev(EventKind::Delete, wd, "x"), t0);
    runner.on_event(&mut tree, &ev(EventKind::Create, wd, "x"), t0);

    assert_eq!(pending_of(&runner), vec![(EventKind::Modify, "x".to_string())]);

    runner.on_alarm(t0 + Duration::from_secs(5));
    assert_eq!(log.invocations()[0].kind, EventKind::Modify);
}

#[test]
fn move_without_handler_becomes_delete_then_create() {
    let mut tree = FakeTree::new(&["/src"]);
    let (mut runner, _log) = setup_quiet(&mut tree, "/src", "t:/", ConfigSpec::default());
    let wd = tree.wd_of("/src");
    let t0 = Instant::now();

    runner.on_event(&mut tree, &mv(wd, "x", "y"), t0);

    assert_eq!(
        pending_of(&runner),
        vec![
            (EventKind::Delete, "x".to_string()),
            (EventKind::Create, "y".to_string()),
        ]
    );
}

#[test]
fn move_with_handler_reaches_action_paired() {
    let mut tree = FakeTree::new(&["/src"]);
    let spec = ConfigSpec {
        move_handler: true,
        ..ConfigSpec::default()
    };
    let (mut runner, log) = setup_quiet(&mut tree, "/src", "t:/", spec);
    let wd = tree.wd_of("/src");
    let t0 = Instant::now();

    runner.on_event(&mut tree, &mv(wd, "x", "y"), t0);
    runner.on_alarm(t0 + Duration::from_secs(5));

    assert_eq!(log.count(), 1);
    assert_eq!(log.invocations()[0].kind, EventKind::Move);
}

#[test]
fn rapid_modifies_collapse_into_one_action() {
    let mut tree = FakeTree::new(&["/src"]);
    let (mut runner, log) = setup_quiet(&mut tree, "/src", "t:/", ConfigSpec::default());
    let wd = tree.wd_of("/src");
    let t0 = Instant::now();

    for ms in [0, 50, 100] {
        runner.on_event(
            &mut tree,
            &ev(EventKind::Modify, wd, "x"),
            t0 + Duration::from_millis(ms),
        );
    }

    assert_eq!(runner.earliest_alarm(), Some(t0 + Duration::from_secs(5)));

    // Before the deadline nothing fires
    runner.on_alarm(t0 + Duration::from_secs(4));
    assert_eq!(log.count(), 0);

    runner.on_alarm(t0 + Duration::from_secs(5));
    assert_eq!(log.count(), 1);
    assert!(pending_of(&runner).is_empty());

    // And nothing is left to fire afterwards
    runner.on_alarm(t0 + Duration::from_secs(60));
    assert_eq!(log.count(), 1);
}

#[test]
fn directory_create_installs_watch_for_subtree() {
    let mut tree = FakeTree::new(&["/src"]);
    let (mut runner, _log) = setup_quiet(&mut tree, "/src", "t:/", ConfigSpec::default());
    let wd = tree.wd_of("/src");
    let t0 = Instant::now();

    // The directory appears on disk, then its create event arrives
    tree.add_dir("/src/sub");
    runner.on_event(&mut tree, &dir_ev(EventKind::Create, wd, "sub"), t0);

    assert_eq!(tree.watch_count(), 2);
    assert_eq!(runner.watch_count(), 2);

    // A file created inside is dispatched against the new descriptor
    let sub_wd = tree.wd_of("/src/sub");
    runner.on_event(&mut tree, &ev(EventKind::Create, sub_wd, "f"), t0);

    let pending = pending_of(&runner);
    assert!(pending.contains(&(EventKind::Create, "sub/f".to_string())), "{pending:?}");
}

#[test]
fn saturated_origin_does_not_raise_alarms() {
    let mut tree = FakeTree::new(&["/src"]);
    let (mut runner, log) = setup_quiet(&mut tree, "/src", "t:/", ConfigSpec::default());
    let wd = tree.wd_of("/src");
    let t0 = Instant::now();

    runner.on_event(&mut tree, &ev(EventKind::Modify, wd, "x"), t0);
    runner.on_alarm(t0 + Duration::from_secs(5));
    assert_eq!(log.count(), 1);
    let pid = log.last_pid();

    // Second event while the only process slot is occupied: no alarm
    runner.on_event(&mut tree, &ev(EventKind::Modify, wd, "y"), t0 + Duration::from_secs(6));
    assert_eq!(runner.earliest_alarm(), None);

    // The slot frees and the alarm comes back
    assert!(runner.collect_process(pid, 0));
    assert_eq!(
        runner.earliest_alarm(),
        Some(t0 + Duration::from_secs(11))
    );

    runner.on_alarm(t0 + Duration::from_secs(11));
    assert_eq!(log.count(), 2);
}

#[test]
fn process_cap_is_never_exceeded() {
    let mut tree = FakeTree::new(&["/src"]);
    let spec = ConfigSpec {
        delay: Duration::ZERO,
        max_processes: 2,
        max_actions: 8,
        ..ConfigSpec::default()
    };
    let (mut runner, log) = setup_quiet(&mut tree, "/src", "t:/", spec);
    let wd = tree.wd_of("/src");
    let t0 = Instant::now();

    for name in ["a", "b", "c", "d", "e"] {
        runner.on_event(&mut tree, &ev(EventKind::Modify, wd, name), t0);
    }

    runner.on_alarm(t0);
    assert_eq!(log.count(), 2);
    assert_eq!(runner.registry().get(0).processes().len(), 2);

    // Repeated alarms cannot push past the cap
    runner.on_alarm(t0 + Duration::from_secs(1));
    assert_eq!(log.count(), 2);

    // Each collected child admits exactly one more
    runner.collect_process(100, 0);
    runner.on_alarm(t0 + Duration::from_secs(2));
    assert_eq!(log.count(), 3);
    assert_eq!(runner.registry().get(0).processes().len(), 2);
}

#[test]
fn max_actions_limits_invocations_per_tick() {
    let mut tree = FakeTree::new(&["/src"]);
    let spec = ConfigSpec {
        delay: Duration::ZERO,
        max_processes: 8,
        max_actions: 1,
        ..ConfigSpec::default()
    };
    let (mut runner, log) = setup_quiet(&mut tree, "/src", "t:/", spec);
    let wd = tree.wd_of("/src");
    let t0 = Instant::now();

    for name in ["a", "b", "c"] {
        runner.on_event(&mut tree, &ev(EventKind::Modify, wd, name), t0);
    }

    runner.on_alarm(t0);
    assert_eq!(log.count(), 1);
    runner.on_alarm(t0);
    assert_eq!(log.count(), 2);
    runner.on_alarm(t0);
    assert_eq!(log.count(), 3);
}

#[test]
fn warmstart_synthesizes_creates_for_each_directory() {
    let mut tree = FakeTree::new(&["/src", "/src/sub"]);
    let (runner, _log) = setup(&mut tree, "/src", "t:/", ConfigSpec::default());

    assert_eq!(runner.phase(), Phase::Running);
    let pending = pending_of(&runner);
    assert_eq!(
        pending,
        vec![
            (EventKind::Create, "".to_string()),
            (EventKind::Create, "sub/".to_string()),
        ]
    );

    // Undelayed: due as soon as the host ticks
    let alarm = runner.earliest_alarm().unwrap();
    assert!(alarm <= Instant::now());
}

#[test]
fn startup_suppresses_warmstart_and_gates_running() {
    let mut tree = FakeTree::new(&["/src"]);
    let log = ActionLog::new();
    let mut registry = OriginRegistry::new();
    let spec = ConfigSpec {
        startup_pid: Some(77),
        ..ConfigSpec::default()
    };
    registry
        .add(Path::new("/src"), "t:/", origin_config(&spec, &log), &tree)
        .unwrap();
    let mut runner = Runner::new(registry);

    let plan = runner.initialize(&mut tree, Instant::now()).unwrap();
    assert_eq!(plan.pids, vec![77]);
    assert_eq!(runner.phase(), Phase::Startup);
    assert!(pending_of(&runner).is_empty());
    assert_eq!(runner.earliest_alarm(), None);

    runner.startup_complete();
    assert_eq!(runner.phase(), Phase::Running);
}

#[test]
fn watch_failure_skips_subtree_only() {
    let mut tree =
        FakeTree::new(&["/src", "/src/ok", "/src/bad", "/src/bad/nested"]).fail_on("/src/bad");
    let (runner, _log) = setup_quiet(&mut tree, "/src", "t:/", ConfigSpec::default());

    // Root and the good subtree are watched; the bad subtree is skipped whole
    assert_eq!(tree.watch_count(), 2);
    assert_eq!(runner.watch_count(), 2);
}

#[test]
fn stale_descriptor_is_dropped() {
    let mut tree = FakeTree::new(&["/src"]);
    let (mut runner, log) = setup_quiet(&mut tree, "/src", "t:/", ConfigSpec::default());
    let t0 = Instant::now();

    runner.on_event(&mut tree, &ev(EventKind::Modify, 999, "x"), t0);

    assert!(pending_of(&runner).is_empty());
    runner.on_alarm(t0 + Duration::from_secs(60));
    assert_eq!(log.count(), 0);
}

#[test]
fn shared_directory_feeds_both_origins() {
    let mut tree = FakeTree::new(&["/src"]);
    let log = ActionLog::new();
    let mut registry = OriginRegistry::new();
    for target in ["t1:/", "t2:/"] {
        let spec = ConfigSpec {
            startup_pid: Some(50),
            ..ConfigSpec::default()
        };
        registry
            .add(Path::new("/src"), target, origin_config(&spec, &log), &tree)
            .unwrap();
    }
    let mut runner = Runner::new(registry);
    runner.initialize(&mut tree, Instant::now()).unwrap();
    runner.startup_complete();

    let wd = tree.wd_of("/src");
    let t0 = Instant::now();
    runner.on_event(&mut tree, &ev(EventKind::Modify, wd, "x"), t0);

    assert_eq!(runner.registry().get(0).delays().pending(), 1);
    assert_eq!(runner.registry().get(1).delays().pending(), 1);

    runner.on_alarm(t0 + Duration::from_secs(5));
    let targets: Vec<String> = log.invocations().into_iter().map(|i| i.target).collect();
    assert_eq!(targets, vec!["t1:/x".to_string(), "t2:/x".to_string()]);
}

#[test]
fn unresolvable_source_is_a_config_error() {
    let tree = FakeTree::new(&["/src"]);
    let log = ActionLog::new();
    let mut registry = OriginRegistry::new();
    let err = registry
        .add(
            Path::new("/missing"),
            "t:/",
            origin_config(&ConfigSpec::default(), &log),
            &tree,
        )
        .unwrap_err();
    assert!(matches!(err, ConfigError::UnresolvableSource { .. }));
}

#[test]
fn empty_registry_is_nothing_to_watch() {
    let mut tree = FakeTree::new(&["/src"]);
    let mut runner = Runner::new(OriginRegistry::new());
    let err = runner.initialize(&mut tree, Instant::now()).unwrap_err();
    assert!(matches!(err, ConfigError::NothingToWatch));
}

#[test]
fn unknown_pid_collection_is_harmless() {
    let mut tree = FakeTree::new(&["/src"]);
    let (mut runner, _log) = setup_quiet(&mut tree, "/src", "t:/", ConfigSpec::default());
    assert!(!runner.collect_process(4242, 1));
}

#[test]
fn status_report_lists_origins_and_watches() {
    let mut tree = FakeTree::new(&["/src"]);
    let (mut runner, _log) = setup_quiet(&mut tree, "/src", "t:/", ConfigSpec::default());
    let wd = tree.wd_of("/src");
    let t0 = Instant::now();
    runner.on_event(&mut tree, &ev(EventKind::Modify, wd, "x"), t0);

    let mut buf = Vec::new();
    runner.status_report(t0, &mut buf).unwrap();
    let report = String::from_utf8(buf).unwrap();

    assert!(report.contains("origin /src -> t:/"));
    assert!(report.contains("pending delays: 1"));
    assert!(report.contains("Modify x"));
    assert!(report.contains("watched directories: 1"));
}
