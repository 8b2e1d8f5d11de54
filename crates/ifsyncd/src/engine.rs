//! Reconciliation Engine
//!
//! Two triggers drive the engine:
//!
//! - startup: `Idle -> Enumerating -> Seeding -> Idle`. The kernel link
//!   dump populates the registry, every record resolves its owning section
//!   and is seeded from kernel data, then every record is pushed.
//! - change notification: `Idle -> Verifying -> Applying -> Idle`.
//!   Verification accepts every change. On `apply` every record is pulled
//!   from the datastore, the writable scalars of every record with a
//!   section go to the persistent store, and exactly one service restart
//!   is scheduled.
//!
//! Planning is pure: [`on_link_dump_reply`] and [`on_datastore_change`]
//! turn the current state and an event into the next state plus a list of
//! [`EngineCommand`]s. [`ReconciliationEngine`] executes them in order and
//! collects per-field outcomes.

use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::bridge;
use crate::datastore::Datastore;
use crate::kernel::{first_address_of, AddressInfo, KernelStateReader, LinkInfo};
use crate::registry::InterfaceRegistry;
use crate::restart::RestartScheduler;
use crate::store::{PersistentStore, ScalarField, WriteOutcome};
use crate::types::{ChangeEvent, FieldOutcome, FieldStatus, InterfaceRecord, Ipv4Address};

/// Engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum EngineState {
    #[default]
    Idle,
    Enumerating,
    Seeding,
    Verifying,
    Applying,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineState::Idle => "idle",
            EngineState::Enumerating => "enumerating",
            EngineState::Seeding => "seeding",
            EngineState::Verifying => "verifying",
            EngineState::Applying => "applying",
        };
        f.write_str(s)
    }
}

/// Kernel facts gathered at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkDump {
    pub links: Vec<LinkInfo>,
    pub addresses: Vec<AddressInfo>,
}

/// A side effect requested by the planner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    /// Add a record for a newly enumerated interface.
    Register { interface: String },
    /// Look up the owning persistent-store section.
    ResolveSection { interface: String },
    /// Overwrite kernel-derived fields. `None` keeps the current value.
    Seed {
        interface: String,
        mtu: Option<u16>,
        address: Option<Ipv4Address>,
    },
    /// Write the record into the datastore.
    Push { interface: String },
    /// Refresh the record from the datastore.
    Pull { interface: String },
    /// Write one field of the record to its section.
    ApplyScalar {
        interface: String,
        section: String,
        field: ScalarField,
    },
    ScheduleRestart { delay: Duration },
}

/// Next state plus the commands that lead to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: EngineState,
    pub commands: Vec<EngineCommand>,
}

impl Transition {
    fn stay(state: EngineState) -> Self {
        Self {
            next: state,
            commands: Vec::new(),
        }
    }
}

/// Plan startup from a link dump.
///
/// Only valid while enumerating. Interface names are registered in kernel
/// order with repeats dropped, then each interface resolves its section
/// and is seeded, then each is pushed.
pub fn on_link_dump_reply(state: EngineState, dump: &LinkDump) -> Transition {
    if state != EngineState::Enumerating {
        warn!(%state, "Link dump outside of enumeration, ignoring");
        return Transition::stay(state);
    }

    let mut seen = HashSet::new();
    let links: Vec<&LinkInfo> = dump
        .links
        .iter()
        .filter(|l| !l.name.is_empty() && seen.insert(l.name.as_str()))
        .collect();

    let mut commands = Vec::with_capacity(links.len() * 4);
    for link in &links {
        commands.push(EngineCommand::Register {
            interface: link.name.clone(),
        });
    }
    for link in &links {
        commands.push(EngineCommand::ResolveSection {
            interface: link.name.clone(),
        });
        commands.push(EngineCommand::Seed {
            interface: link.name.clone(),
            mtu: link.mtu.and_then(|m| u16::try_from(m).ok()),
            address: first_address_of(&dump.addresses, link.index).map(|a| Ipv4Address {
                ip: a.ip.to_string(),
                prefix_length: a.prefix_length,
            }),
        });
    }
    for link in &links {
        commands.push(EngineCommand::Push {
            interface: link.name.clone(),
        });
    }

    Transition {
        next: EngineState::Seeding,
        commands,
    }
}

/// Plan the reaction to a change notification.
///
/// `verify` and `abort` change nothing. `apply` pulls every record, writes
/// every writable field of every record with a section, then schedules one
/// restart.
pub fn on_datastore_change(
    state: EngineState,
    event: ChangeEvent,
    registry: &InterfaceRegistry,
    restart_delay: Duration,
) -> Transition {
    if state != EngineState::Idle {
        warn!(%state, event = event.as_str(), "Change notification while busy, ignoring");
        return Transition::stay(state);
    }

    match event {
        ChangeEvent::Verify | ChangeEvent::Abort => Transition::stay(EngineState::Idle),
        ChangeEvent::Apply => {
            let mut commands: Vec<EngineCommand> = registry
                .iter()
                .map(|r| EngineCommand::Pull {
                    interface: r.name().to_string(),
                })
                .collect();

            for record in registry.iter() {
                let Some(section) = record.section() else {
                    debug!(interface = %record.name(), "No owning section, skipping store writes");
                    continue;
                };
                for field in ScalarField::WRITABLE {
                    commands.push(EngineCommand::ApplyScalar {
                        interface: record.name().to_string(),
                        section: section.to_string(),
                        field,
                    });
                }
            }

            commands.push(EngineCommand::ScheduleRestart {
                delay: restart_delay,
            });

            Transition {
                next: EngineState::Applying,
                commands,
            }
        }
    }
}

/// Outcome of the startup transition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StartupReport {
    pub interfaces: usize,
    pub resolved: usize,
    pub pushed: Vec<FieldOutcome>,
}

/// Outcome of an `apply` notification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub pulled: Vec<FieldOutcome>,
    pub written: Vec<FieldOutcome>,
    pub restart_scheduled: bool,
}

impl ApplyReport {
    pub fn failures(&self) -> impl Iterator<Item = &FieldOutcome> {
        self.pulled
            .iter()
            .chain(self.written.iter())
            .filter(|o| o.is_failure())
    }
}

/// Result of one change notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ChangeOutcome {
    Verified,
    Applied(ApplyReport),
    /// No compensating action exists for an abort.
    Aborted,
    /// Arrived while the engine was busy with another transition.
    Ignored,
}

impl ChangeOutcome {
    /// What the notification source is told. Partial failures are carried
    /// in the report, never in this flag.
    pub fn is_success(&self) -> bool {
        true
    }
}

#[derive(Debug, Default)]
struct Execution {
    pulled: Vec<FieldOutcome>,
    written: Vec<FieldOutcome>,
    pushed: Vec<FieldOutcome>,
    restart_scheduled: bool,
}

/// Owns the registry and drives every adapter.
pub struct ReconciliationEngine {
    state: EngineState,
    registry: InterfaceRegistry,
    store: PersistentStore,
    datastore: Arc<dyn Datastore>,
    restarter: Arc<dyn RestartScheduler>,
    restart_delay: Duration,
}

impl ReconciliationEngine {
    pub fn new(
        store: PersistentStore,
        datastore: Arc<dyn Datastore>,
        restarter: Arc<dyn RestartScheduler>,
        restart_delay: Duration,
    ) -> Self {
        Self {
            state: EngineState::Idle,
            registry: InterfaceRegistry::new(),
            store,
            datastore,
            restarter,
            restart_delay,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn registry(&self) -> &InterfaceRegistry {
        &self.registry
    }

    pub fn store(&self) -> &PersistentStore {
        &self.store
    }

    /// Enumerate, seed and push. Individual failures are logged and
    /// reported; the engine always ends up idle.
    pub async fn startup(&mut self, kernel: &mut KernelStateReader) -> StartupReport {
        self.state = EngineState::Enumerating;
        let dump = LinkDump {
            links: kernel.links(),
            addresses: kernel.ipv4_addresses(),
        };
        self.startup_from(&dump).await
    }

    /// Startup from an already collected dump.
    pub async fn startup_from(&mut self, dump: &LinkDump) -> StartupReport {
        self.state = EngineState::Enumerating;
        info!(links = dump.links.len(), "Enumerating interfaces");

        let transition = on_link_dump_reply(self.state, dump);
        self.state = transition.next;
        let exec = self.execute(transition.commands).await;
        self.state = EngineState::Idle;

        let report = StartupReport {
            interfaces: self.registry.len(),
            resolved: self.registry.iter().filter(|r| r.section().is_some()).count(),
            pushed: exec.pushed,
        };
        info!(
            interfaces = report.interfaces,
            resolved = report.resolved,
            "Startup reconciliation complete"
        );
        report
    }

    /// Handle one change notification.
    ///
    /// A notification that arrives while the engine is not idle is ignored
    /// and leaves the state untouched.
    pub async fn on_change(&mut self, event: ChangeEvent) -> ChangeOutcome {
        debug!(event = event.as_str(), state = %self.state, "Change notification");

        let transition =
            on_datastore_change(self.state, event, &self.registry, self.restart_delay);
        if self.state != EngineState::Idle {
            return ChangeOutcome::Ignored;
        }
        // Every change passes verification.
        self.state = EngineState::Verifying;

        let outcome = match event {
            ChangeEvent::Verify => ChangeOutcome::Verified,
            ChangeEvent::Abort => {
                warn!("Change aborted by datastore, no compensating action taken");
                ChangeOutcome::Aborted
            }
            ChangeEvent::Apply => {
                self.state = transition.next;
                let exec = self.execute(transition.commands).await;

                let report = ApplyReport {
                    pulled: exec.pulled,
                    written: exec.written,
                    restart_scheduled: exec.restart_scheduled,
                };
                let failures = report.failures().count();
                if failures > 0 {
                    warn!(failures, "Change applied with failures");
                } else {
                    info!("Change applied");
                }
                ChangeOutcome::Applied(report)
            }
        };

        self.state = EngineState::Idle;
        outcome
    }

    async fn execute(&mut self, commands: Vec<EngineCommand>) -> Execution {
        let mut exec = Execution::default();
        let mut rejected = HashSet::new();

        for command in commands {
            match command {
                EngineCommand::Register { interface } => {
                    if self
                        .registry
                        .insert(InterfaceRecord::new(interface.clone()))
                        .is_err()
                    {
                        rejected.insert(interface);
                    }
                }
                EngineCommand::ResolveSection { interface } => {
                    if rejected.contains(&interface) {
                        continue;
                    }
                    let Some(section) = self.store.resolve_section(&interface) else {
                        continue;
                    };
                    if let Some(record) = self.registry.get_mut(&interface) {
                        record.resolve_section(section);
                    }
                }
                EngineCommand::Seed {
                    interface,
                    mtu,
                    address,
                } => {
                    if rejected.contains(&interface) {
                        continue;
                    }
                    if let Some(record) = self.registry.get_mut(&interface) {
                        if let Some(mtu) = mtu {
                            record.ipv4.mtu = mtu;
                        }
                        if let Some(address) = address {
                            record.ipv4.address = address;
                        }
                    }
                }
                EngineCommand::Push { interface } => {
                    if rejected.contains(&interface) {
                        continue;
                    }
                    match self.registry.get(&interface) {
                        Some(record) => {
                            let outcomes = bridge::push(self.datastore.as_ref(), record).await;
                            exec.pushed.extend(outcomes);
                        }
                        None => exec.pushed.push(missing_record(&interface, "push")),
                    }
                }
                EngineCommand::Pull { interface } => match self.registry.get_mut(&interface) {
                    Some(record) => {
                        let outcomes = bridge::pull(self.datastore.as_ref(), record).await;
                        exec.pulled.extend(outcomes);
                    }
                    None => exec.pulled.push(missing_record(&interface, "pull")),
                },
                EngineCommand::ApplyScalar {
                    interface,
                    section,
                    field,
                } => {
                    let outcome = self.apply_scalar(&interface, &section, field);
                    exec.written.push(outcome);
                }
                EngineCommand::ScheduleRestart { delay } => {
                    self.restarter.schedule_restart(delay);
                    exec.restart_scheduled = true;
                }
            }
        }

        exec
    }

    fn apply_scalar(&self, interface: &str, section: &str, field: ScalarField) -> FieldOutcome {
        let Some(record) = self.registry.get(interface) else {
            return missing_record(interface, field.as_str());
        };

        let value = field.uci_value(&record.ipv4);
        let status = match self.store.apply_scalar(section, field, value.as_deref()) {
            Ok(WriteOutcome::Written) => FieldStatus::Written,
            Ok(WriteOutcome::Removed) => FieldStatus::Removed,
            Ok(WriteOutcome::Skipped) => FieldStatus::Skipped,
            Err(e) => {
                warn!(interface, section, %field, error = %e, "Store write rejected");
                FieldStatus::Failed(e.to_string())
            }
        };
        FieldOutcome::new(interface, field.as_str(), status)
    }
}

fn missing_record(interface: &str, field: &str) -> FieldOutcome {
    warn!(interface, "Interface not in registry");
    FieldOutcome::new(
        interface,
        field,
        FieldStatus::Failed("interface not in registry".to_string()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::MemoryDatastore;
    use crate::restart::MockRestartScheduler;
    use crate::types::DataValue;
    use crate::xpath;
    use ifsync_common::IfsyncResult;
    use pretty_assertions::assert_eq;
    use std::net::Ipv4Addr;
    use tempfile::TempDir;

    fn link(index: u32, name: &str, mtu: u32) -> LinkInfo {
        LinkInfo {
            index,
            name: name.to_string(),
            mtu: Some(mtu),
        }
    }

    fn registry_with(records: Vec<InterfaceRecord>) -> InterfaceRegistry {
        let mut registry = InterfaceRegistry::new();
        for r in records {
            registry.insert(r).unwrap();
        }
        registry
    }

    #[test]
    fn test_link_dump_plan() {
        let dump = LinkDump {
            links: vec![link(1, "eth0", 1500), link(2, "eth1", 70000), link(3, "eth0", 9000)],
            addresses: vec![AddressInfo {
                index: 1,
                ip: Ipv4Addr::new(192, 168, 1, 1),
                prefix_length: 24,
            }],
        };
        let t = on_link_dump_reply(EngineState::Enumerating, &dump);
        assert_eq!(t.next, EngineState::Seeding);
        assert_eq!(
            t.commands,
            vec![
                EngineCommand::Register { interface: "eth0".into() },
                EngineCommand::Register { interface: "eth1".into() },
                EngineCommand::ResolveSection { interface: "eth0".into() },
                EngineCommand::Seed {
                    interface: "eth0".into(),
                    mtu: Some(1500),
                    address: Some(Ipv4Address {
                        ip: "192.168.1.1".into(),
                        prefix_length: 24
                    }),
                },
                EngineCommand::ResolveSection { interface: "eth1".into() },
                EngineCommand::Seed {
                    interface: "eth1".into(),
                    mtu: None,
                    address: None,
                },
                EngineCommand::Push { interface: "eth0".into() },
                EngineCommand::Push { interface: "eth1".into() },
            ]
        );
    }

    #[test]
    fn test_link_dump_outside_enumeration() {
        let t = on_link_dump_reply(EngineState::Idle, &LinkDump::default());
        assert_eq!(t, Transition::stay(EngineState::Idle));
    }

    #[test]
    fn test_verify_and_abort_plan_nothing() {
        let registry = registry_with(vec![InterfaceRecord::new("eth0")]);
        for event in [ChangeEvent::Verify, ChangeEvent::Abort] {
            let t = on_datastore_change(EngineState::Idle, event, &registry, Duration::ZERO);
            assert_eq!(t.next, EngineState::Idle);
            assert!(t.commands.is_empty());
        }
    }

    #[test]
    fn test_apply_plan() {
        let mut lan = InterfaceRecord::new("eth0");
        lan.resolve_section("lan");
        let registry = registry_with(vec![lan, InterfaceRecord::new("eth1")]);

        let t = on_datastore_change(
            EngineState::Idle,
            ChangeEvent::Apply,
            &registry,
            Duration::from_secs(5),
        );
        assert_eq!(t.next, EngineState::Applying);

        let pulls = t
            .commands
            .iter()
            .filter(|c| matches!(c, EngineCommand::Pull { .. }))
            .count();
        assert_eq!(pulls, 2);

        let writes: Vec<_> = t
            .commands
            .iter()
            .filter_map(|c| match c {
                EngineCommand::ApplyScalar {
                    interface,
                    section,
                    field,
                } => Some((interface.as_str(), section.as_str(), *field)),
                _ => None,
            })
            .collect();
        assert_eq!(
            writes,
            vec![
                ("eth0", "lan", ScalarField::Enabled),
                ("eth0", "lan", ScalarField::Origin),
                ("eth0", "lan", ScalarField::Mtu),
                ("eth0", "lan", ScalarField::Ipv4Address),
            ]
        );
        assert_eq!(
            t.commands.last(),
            Some(&EngineCommand::ScheduleRestart {
                delay: Duration::from_secs(5)
            })
        );
    }

    #[test]
    fn test_change_while_busy_ignored() {
        let registry = InterfaceRegistry::new();
        let t = on_datastore_change(
            EngineState::Seeding,
            ChangeEvent::Apply,
            &registry,
            Duration::ZERO,
        );
        assert_eq!(t, Transition::stay(EngineState::Seeding));
    }

    fn engine_with(
        network: &str,
        datastore: Arc<MemoryDatastore>,
        restarter: MockRestartScheduler,
    ) -> (TempDir, ReconciliationEngine) {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("network"), network).unwrap();
        let store = PersistentStore::new(dir.path(), "network", "ifname");
        let engine = ReconciliationEngine::new(
            store,
            datastore,
            Arc::new(restarter),
            Duration::from_secs(5),
        );
        (dir, engine)
    }

    #[tokio::test]
    async fn test_startup_seeds_and_pushes() {
        let ds = Arc::new(MemoryDatastore::new());
        let (_dir, mut engine) = engine_with(
            "config interface 'lan'\n\toption ifname 'eth0'\n",
            ds.clone(),
            MockRestartScheduler::new(),
        );

        let dump = LinkDump {
            links: vec![link(1, "eth0", 1500), link(2, "eth1", 1400)],
            addresses: vec![],
        };
        let report = engine.startup_from(&dump).await;

        assert_eq!(engine.state(), EngineState::Idle);
        assert_eq!(report.interfaces, 2);
        assert_eq!(report.resolved, 1);
        assert_eq!(report.pushed.len(), 10);
        assert_eq!(engine.registry().get("eth0").unwrap().section(), Some("lan"));
        assert_eq!(ds.get(&xpath::ipv4("eth1", "mtu")), Some(DataValue::Uint16(1400)));
        assert_eq!(ds.commit_count(), 2);
    }

    #[tokio::test]
    async fn test_verify_changes_nothing() {
        let ds = Arc::new(MemoryDatastore::with_items([(
            xpath::ipv4("eth0", "mtu"),
            DataValue::Uint16(9000),
        )]));
        let mut restarter = MockRestartScheduler::new();
        restarter.expect_schedule_restart().times(0);
        let (_dir, mut engine) = engine_with(
            "config interface 'lan'\n\toption ifname 'eth0'\n",
            ds,
            restarter,
        );
        engine
            .startup_from(&LinkDump {
                links: vec![link(1, "eth0", 1500)],
                addresses: vec![],
            })
            .await;
        let before = engine.registry().get("eth0").cloned();

        let outcome = engine.on_change(ChangeEvent::Verify).await;
        assert_eq!(outcome, ChangeOutcome::Verified);
        assert_eq!(engine.registry().get("eth0").cloned(), before);

        let outcome = engine.on_change(ChangeEvent::Abort).await;
        assert_eq!(outcome, ChangeOutcome::Aborted);
        assert!(outcome.is_success());
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[tokio::test]
    async fn test_apply_failure_still_restarts_once() {
        let ds = Arc::new(MemoryDatastore::new());
        let mut restarter = MockRestartScheduler::new();
        restarter
            .expect_schedule_restart()
            .withf(|d| *d == Duration::from_secs(5))
            .times(1)
            .return_const(());
        // Section points at an interface but the package is replaced below
        let (dir, mut engine) = engine_with(
            "config interface 'lan'\n\toption ifname 'eth0'\n",
            ds,
            restarter,
        );
        engine
            .startup_from(&LinkDump {
                links: vec![link(1, "eth0", 1500)],
                addresses: vec![],
            })
            .await;
        std::fs::write(dir.path().join("network"), "config interface 'wan'\n").unwrap();

        let ChangeOutcome::Applied(report) = engine.on_change(ChangeEvent::Apply).await else {
            panic!("expected an apply report");
        };
        assert!(report.restart_scheduled);
        assert_eq!(report.written.len(), 4);
        assert_eq!(report.failures().count(), 4);
        assert_eq!(engine.store().loaded_packages(), 0);
    }

    /// Datastore whose reads never complete.
    struct StalledDatastore;

    #[async_trait::async_trait]
    impl Datastore for StalledDatastore {
        async fn get_item(&self, _xpath: &str) -> IfsyncResult<Option<DataValue>> {
            std::future::pending().await
        }

        async fn set_item(&self, _xpath: &str, _value: DataValue) -> IfsyncResult<()> {
            Ok(())
        }

        async fn commit(&self) -> IfsyncResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_change_while_applying_is_ignored() {
        let mut restarter = MockRestartScheduler::new();
        restarter.expect_schedule_restart().times(0);
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("network"), "config interface 'lan'\n").unwrap();
        let mut engine = ReconciliationEngine::new(
            PersistentStore::new(dir.path(), "network", "ifname"),
            Arc::new(StalledDatastore),
            Arc::new(restarter),
            Duration::from_secs(5),
        );
        engine
            .startup_from(&LinkDump {
                links: vec![link(1, "eth0", 1500)],
                addresses: vec![],
            })
            .await;
        assert_eq!(engine.state(), EngineState::Idle);

        // The apply never finishes its pull and is abandoned mid-transition
        let stalled =
            tokio::time::timeout(Duration::from_millis(20), engine.on_change(ChangeEvent::Apply))
                .await;
        assert!(stalled.is_err());
        assert_eq!(engine.state(), EngineState::Applying);

        let outcome = engine.on_change(ChangeEvent::Apply).await;
        assert_eq!(outcome, ChangeOutcome::Ignored);
        assert_eq!(engine.state(), EngineState::Applying);
    }
}
