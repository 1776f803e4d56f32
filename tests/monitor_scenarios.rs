//! End-to-end monitoring loop scenarios with scripted probes and a manual clock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use supervisor::adapters::{
    CommandOutput, CommandRunner, HttpProbe, InitSystem, PortDialer, ProcessLister, ServiceManager,
};
use supervisor::coordination::LoopControl;
use supervisor::SupervisorConfig;
use supervisor::domain::{AlertEvent, ServiceRegistry, ServiceStatus, Severity};
use supervisor::error::{Result, SupervisorError};
use supervisor::supervisor::{
    AlertDispatcher, AlertSink, HealthChecker, ManualClock, Monitor, MonitorSettings,
    RecoveryConfig, RecoveryPolicy, RegistrySource, ServiceOutcome, StateStore,
};

/// Port probe answering from a per-port script; an exhausted script repeats `fallback`
struct ScriptedDialer {
    answers: Mutex<HashMap<u16, VecDeque<bool>>>,
    fallback: bool,
}

impl ScriptedDialer {
    fn new(fallback: bool) -> Self {
        Self {
            answers: Mutex::new(HashMap::new()),
            fallback,
        }
    }

    fn script(self, port: u16, answers: &[bool]) -> Self {
        self.answers
            .lock()
            .unwrap()
            .insert(port, answers.iter().copied().collect());
        self
    }
}

#[async_trait]
impl PortDialer for ScriptedDialer {
    async fn dial(&self, _host: &str, port: u16, _timeout: Duration) -> bool {
        self.answers
            .lock()
            .unwrap()
            .get_mut(&port)
            .and_then(|q| q.pop_front())
            .unwrap_or(self.fallback)
    }
}

struct FixedProcesses(Result<Vec<String>>);

#[async_trait]
impl ProcessLister for FixedProcesses {
    async fn process_names(&self) -> Result<Vec<String>> {
        match &self.0 {
            Ok(names) => Ok(names.clone()),
            Err(e) => Err(SupervisorError::Probe(e.to_string())),
        }
    }
}

struct NoHttp;

#[async_trait]
impl HttpProbe for NoHttp {
    async fn get_status(&self, url: &str, _timeout: Duration) -> Result<u16> {
        Err(SupervisorError::Probe(format!("no route to {url}")))
    }
}

/// Records restart commands; exits with `code`
struct RestartRecorder {
    code: i32,
    calls: Mutex<Vec<String>>,
}

impl RestartRecorder {
    fn new(code: i32) -> Arc<Self> {
        Arc::new(Self {
            code,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for RestartRecorder {
    async fn run(&self, program: &str, args: &[String], _timeout: Duration) -> Result<CommandOutput> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{} {}", program, args.join(" ")));
        Ok(CommandOutput {
            code: Some(self.code),
            stderr: String::new(),
        })
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<AlertEvent>>,
}

impl RecordingSink {
    fn severities(&self) -> Vec<Severity> {
        self.events.lock().unwrap().iter().map(|e| e.severity).collect()
    }

    fn count(&self, severity: Severity) -> usize {
        self.severities().iter().filter(|s| **s == severity).count()
    }
}

#[async_trait]
impl AlertSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn deliver(&self, event: &AlertEvent) -> Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

struct StaticSource(Vec<&'static str>);

impl RegistrySource for StaticSource {
    fn load_registry(&self) -> Result<ServiceRegistry> {
        registry(&self.0)
    }
}

fn registry(descriptors: &[&str]) -> Result<ServiceRegistry> {
    ServiceRegistry::new(
        descriptors
            .iter()
            .map(|d| d.parse())
            .collect::<Result<Vec<_>>>()?,
    )
}

fn t0() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

struct Fixture {
    monitor: Monitor,
    clock: Arc<ManualClock>,
    sink: Arc<RecordingSink>,
    restarts: Arc<RestartRecorder>,
    state_path: std::path::PathBuf,
    _dir: tempfile::TempDir,
}

struct Options {
    services: Vec<&'static str>,
    dialer: ScriptedDialer,
    processes: Result<Vec<String>>,
    restart_exit: i32,
    restart_limit: u32,
    cooldown_secs: i64,
    check_interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            services: vec!["web:port:8080"],
            dialer: ScriptedDialer::new(false),
            processes: Ok(Vec::new()),
            restart_exit: 0,
            restart_limit: 3,
            cooldown_secs: 0,
            check_interval: Duration::from_secs(60),
        }
    }
}

fn fixture(opts: Options) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("state.json");
    let clock = Arc::new(ManualClock::new(t0()));
    let sink = Arc::new(RecordingSink::default());
    let restarts = RestartRecorder::new(opts.restart_exit);

    let checker = HealthChecker::new(
        Arc::new(FixedProcesses(opts.processes)),
        Arc::new(opts.dialer),
        Arc::new(NoHttp),
        restarts.clone(),
        Duration::from_secs(1),
    );
    let recovery = RecoveryPolicy::new(
        RecoveryConfig {
            restart_limit: opts.restart_limit,
            restart_window: chrono::Duration::seconds(300),
        },
        ServiceManager::new(InitSystem::Systemd, restarts.clone(), Duration::from_secs(1)),
    );
    let alerts =
        AlertDispatcher::new(chrono::Duration::seconds(opts.cooldown_secs)).with_sink(sink.clone());

    let monitor = Monitor::new(
        MonitorSettings {
            check_interval: opts.check_interval,
            settle_period: Duration::ZERO,
        },
        registry(&opts.services).unwrap(),
        checker,
        recovery,
        alerts,
        StateStore::new(&state_path),
        clock.clone(),
    );

    Fixture {
        monitor,
        clock,
        sink,
        restarts,
        state_path,
        _dir: dir,
    }
}

#[tokio::test]
async fn restart_limit_exhaustion_raises_one_critical() {
    let mut f = fixture(Options::default());

    let mut outcomes = Vec::new();
    for _ in 0..4 {
        let report = f.monitor.run_iteration().await;
        outcomes.push(report.outcome("web").cloned().unwrap());
        f.clock.advance_secs(60);
    }

    assert_eq!(
        outcomes,
        vec![
            ServiceOutcome::RestartUnverified,
            ServiceOutcome::RestartUnverified,
            ServiceOutcome::RestartUnverified,
            ServiceOutcome::Exhausted,
        ]
    );
    assert_eq!(f.restarts.calls(), vec!["systemctl restart web"; 3]);
    assert_eq!(f.monitor.state("web").unwrap().restart_count, 3);
    assert_eq!(f.sink.count(Severity::Critical), 1);
    assert_eq!(f.sink.count(Severity::Warning), 3);

    // Still failing inside the same window: no restart, no second Critical
    let report = f.monitor.run_iteration().await;
    assert_eq!(report.outcome("web"), Some(&ServiceOutcome::Exhausted));
    assert_eq!(f.restarts.calls().len(), 3);
    assert_eq!(f.sink.count(Severity::Critical), 1);
}

#[tokio::test]
async fn exhaustion_ends_when_the_window_rolls_over() {
    let mut f = fixture(Options::default());
    for _ in 0..4 {
        f.monitor.run_iteration().await;
        f.clock.advance_secs(60);
    }
    assert_eq!(f.restarts.calls().len(), 3);

    // Window opened at t0; 301s later a fresh budget is available
    f.clock.set(t0() + chrono::Duration::seconds(301));
    let report = f.monitor.run_iteration().await;
    assert_eq!(report.outcome("web"), Some(&ServiceOutcome::RestartUnverified));
    assert_eq!(f.restarts.calls().len(), 4);
    assert_eq!(f.monitor.state("web").unwrap().restart_count, 1);

    // A second exhaustion in the new window is reported again
    for _ in 0..3 {
        f.clock.advance_secs(30);
        f.monitor.run_iteration().await;
    }
    assert_eq!(f.sink.count(Severity::Critical), 2);
}

#[tokio::test]
async fn down_to_up_fires_one_info_after_verification() {
    // check fails, verification fails; next iteration check fails, verification passes
    let mut f = fixture(Options {
        dialer: ScriptedDialer::new(true).script(8080, &[false, false, false, true]),
        ..Options::default()
    });

    f.monitor.run_iteration().await;
    assert!(f.monitor.state("web").unwrap().is_down());
    assert_eq!(f.sink.severities(), vec![Severity::Warning]);

    f.clock.advance_secs(60);
    let report = f.monitor.run_iteration().await;
    assert_eq!(report.outcome("web"), Some(&ServiceOutcome::Restarted));
    assert_eq!(f.monitor.state("web").unwrap().status, ServiceStatus::Up);
    assert_eq!(f.sink.severities(), vec![Severity::Warning, Severity::Info]);

    // Healthy from now on: nothing more
    f.clock.advance_secs(60);
    let report = f.monitor.run_iteration().await;
    assert_eq!(report.outcome("web"), Some(&ServiceOutcome::Healthy));
    assert_eq!(f.sink.count(Severity::Info), 1);
}

#[tokio::test]
async fn cooldown_limits_alerts_per_service() {
    // Every restart command fails, so every iteration wants a Critical
    let mut f = fixture(Options {
        restart_exit: 1,
        restart_limit: 100,
        cooldown_secs: 600,
        ..Options::default()
    });

    for offset in [0, 300, 700] {
        f.clock.set(t0() + chrono::Duration::seconds(offset));
        let report = f.monitor.run_iteration().await;
        assert_eq!(report.outcome("web"), Some(&ServiceOutcome::RestartFailed));
    }

    assert_eq!(f.sink.count(Severity::Critical), 2);
    let delivered: Vec<_> = f
        .sink
        .events
        .lock()
        .unwrap()
        .iter()
        .map(|e| e.timestamp)
        .collect();
    assert_eq!(
        delivered,
        vec![t0(), t0() + chrono::Duration::seconds(700)]
    );
}

fn default_cooldown_secs() -> i64 {
    i64::try_from(SupervisorConfig::default().alert_cooldown_secs).unwrap()
}

fn timestamps(sink: &RecordingSink, severity: Severity) -> Vec<DateTime<Utc>> {
    sink.events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| e.severity == severity)
        .map(|e| e.timestamp)
        .collect()
}

#[tokio::test]
async fn exhaustion_critical_waits_out_the_cooldown_with_default_tunables() {
    let mut f = fixture(Options {
        cooldown_secs: default_cooldown_secs(),
        ..Options::default()
    });

    // t=0..600: window 1 restarts at 0/60/120, exhausted 180..300;
    // window 2 restarts at 360/420/480, exhausted from 540
    for _ in 0..11 {
        f.monitor.run_iteration().await;
        f.clock.advance_secs(60);
    }

    assert_eq!(f.restarts.calls().len(), 6);
    // The first restart's Warning holds everything back until t=600
    assert_eq!(f.sink.severities(), vec![Severity::Warning, Severity::Critical]);
    assert_eq!(
        timestamps(&f.sink, Severity::Critical),
        vec![t0() + chrono::Duration::seconds(600)]
    );
    assert!(f.monitor.state("web").unwrap().exhaustion_reported);

    // Further exhausted checks in the same window stay quiet
    let report = f.monitor.run_iteration().await;
    assert_eq!(report.outcome("web"), Some(&ServiceOutcome::Exhausted));
    assert_eq!(f.sink.count(Severity::Critical), 1);
}

#[tokio::test]
async fn recovery_info_inside_the_cooldown_is_dropped_not_queued() {
    // fail + failed verification, then fail + verified restart, then healthy
    let mut f = fixture(Options {
        dialer: ScriptedDialer::new(true).script(8080, &[false, false, false, true]),
        cooldown_secs: default_cooldown_secs(),
        ..Options::default()
    });

    f.monitor.run_iteration().await;
    assert_eq!(f.sink.severities(), vec![Severity::Warning]);

    f.clock.advance_secs(60);
    let report = f.monitor.run_iteration().await;
    assert_eq!(report.outcome("web"), Some(&ServiceOutcome::Restarted));
    assert_eq!(f.monitor.state("web").unwrap().status, ServiceStatus::Up);
    // Info suppressed: 60s after the Warning
    assert_eq!(f.sink.severities(), vec![Severity::Warning]);
    assert_eq!(f.monitor.alerts().suppressed_counts().get("web"), Some(&1));

    // Once the cooldown has passed a healthy service does not replay it
    f.clock.set(t0() + chrono::Duration::seconds(700));
    let report = f.monitor.run_iteration().await;
    assert_eq!(report.outcome("web"), Some(&ServiceOutcome::Healthy));
    assert_eq!(f.sink.severities(), vec![Severity::Warning]);
    assert_eq!(
        f.monitor.state("web").unwrap().last_alert_at,
        Some(t0())
    );
}

#[tokio::test]
async fn services_are_checked_in_registration_order() {
    let mut f = fixture(Options {
        services: vec!["zeta:port:9001", "alpha:port:9002", "mid:port:9003"],
        dialer: ScriptedDialer::new(true),
        ..Options::default()
    });
    let report = f.monitor.run_iteration().await;
    let names: Vec<_> = report.outcomes.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["zeta", "alpha", "mid"]);
}

#[tokio::test]
async fn probe_failure_leaves_state_alone() {
    let mut f = fixture(Options {
        services: vec!["cron:process:crond"],
        processes: Err(SupervisorError::Probe("process table unavailable".into())),
        ..Options::default()
    });

    let report = f.monitor.run_iteration().await;
    assert!(matches!(
        report.outcome("cron"),
        Some(ServiceOutcome::CheckError(_))
    ));
    let state = f.monitor.state("cron").unwrap();
    assert_eq!(state.status, ServiceStatus::Up);
    assert_eq!(state.restart_count, 0);
    assert_eq!(state.last_check_at, Some(t0()));
    assert!(f.restarts.calls().is_empty());
    assert!(f.sink.severities().is_empty());
}

#[tokio::test]
async fn reload_keeps_surviving_state_and_drops_removed() {
    let mut f = fixture(Options {
        services: vec!["web:port:8080", "db:port:5432"],
        dialer: ScriptedDialer::new(true).script(8080, &[false, false]),
        ..Options::default()
    });
    f.monitor.run_iteration().await;
    assert_eq!(f.monitor.state("web").unwrap().restart_count, 1);

    assert!(f
        .monitor
        .reload_from(&StaticSource(vec!["web:port:8080", "cache:port:6379"])));

    assert_eq!(f.monitor.registry().names(), vec!["web", "cache"]);
    assert!(f.monitor.state("db").is_none());
    assert_eq!(f.monitor.state("web").unwrap().restart_count, 1);
    assert!(f.monitor.state("web").unwrap().is_down());
    let cache = f.monitor.state("cache").unwrap();
    assert_eq!(cache.status, ServiceStatus::Up);
    assert_eq!(cache.restart_count, 0);
}

#[tokio::test]
async fn state_survives_a_daemon_restart() {
    let mut f = fixture(Options::default());
    f.monitor.run_iteration().await;

    let persisted = StateStore::new(&f.state_path).load().await.unwrap();
    assert_eq!(&persisted, f.monitor.states());
    assert_eq!(persisted["web"].restart_count, 1);

    let mut next = fixture(Options::default());
    next.monitor.restore(persisted);
    assert_eq!(next.monitor.state("web").unwrap().restart_count, 1);
    assert!(next.monitor.state("web").unwrap().is_down());
}

#[tokio::test]
async fn shutdown_interrupts_the_inter_iteration_sleep() {
    let mut f = fixture(Options {
        dialer: ScriptedDialer::new(true),
        check_interval: Duration::from_secs(3600),
        ..Options::default()
    });
    let control = LoopControl::new();
    // Applied at the top of the first iteration
    control.request_reload();
    let source = StaticSource(vec!["web:port:8080", "api:port:9000"]);

    let stopper = {
        let control = control.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            control.request_shutdown();
        }
    };

    let finished = tokio::time::timeout(Duration::from_secs(10), async {
        tokio::join!(f.monitor.run(control.handle(), &source), stopper)
    })
    .await;

    tokio_test::assert_ok!(finished);
    assert_eq!(f.monitor.iterations(), 1);
    assert_eq!(f.monitor.registry().names(), vec!["web", "api"]);
    assert!(f.state_path.exists());
}

#[tokio::test]
async fn shutdown_before_start_runs_no_iteration() {
    let mut f = fixture(Options::default());
    let control = LoopControl::new();
    control.request_shutdown();
    f.monitor
        .run(control.handle(), &StaticSource(vec!["web:port:8080"]))
        .await;
    assert_eq!(f.monitor.iterations(), 0);
}
