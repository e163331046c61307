use super::{LaunchSpec, ProcessIncarnation, ProcessSupervisor};
use crate::error::{HostControllerError, Result};
use crate::events::{EventBus, ProcessInfo, SupervisorEvent};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

struct RunningProcess {
    kill: Option<oneshot::Sender<()>>,
    booted: bool,
}

struct ProcessEntry {
    incarnation: ProcessIncarnation,
    launch: LaunchSpec,
    running: Option<RunningProcess>,
}

/// Supervisor that runs server processes as children of this host controller
pub struct LocalProcessSupervisor {
    event_bus: Arc<EventBus>,
    processes: Arc<Mutex<BTreeMap<String, ProcessEntry>>>,
    next_incarnation: AtomicU64,
}

impl LocalProcessSupervisor {
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self {
            event_bus,
            processes: Arc::new(Mutex::new(BTreeMap::new())),
            next_incarnation: AtomicU64::new(1),
        }
    }

    pub fn running_count(&self) -> usize {
        self.processes
            .lock()
            .values()
            .filter(|entry| entry.running.is_some())
            .count()
    }

    async fn publish(&self, event: SupervisorEvent) {
        publish(&self.event_bus, event).await;
    }

    fn spawn(
        &self,
        process_name: &str,
        incarnation: ProcessIncarnation,
        launch: &LaunchSpec,
    ) -> Result<RunningProcess> {
        let (program, args) = launch.command.split_first().ok_or_else(|| {
            HostControllerError::supervisor(process_name, "no command configured")
        })?;

        let mut command = Command::new(program);
        command
            .args(args)
            .envs(&launch.env)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &launch.working_dir {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .map_err(|e| HostControllerError::supervisor(process_name, e.to_string()))?;
        info!(
            "Launched {} (pid {})",
            process_name,
            child.id().unwrap_or_default()
        );

        let (kill_tx, kill_rx) = oneshot::channel();
        let event_bus = Arc::clone(&self.event_bus);
        let processes = Arc::clone(&self.processes);
        let name = process_name.to_string();
        let started_at = Instant::now();

        tokio::spawn(async move {
            let stop_requested = tokio::select! {
                _ = child.wait() => false,
                _ = kill_rx => true,
            };

            if stop_requested {
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill {}: {}", name, e);
                }
            }

            match child.wait().await {
                Ok(status) => debug!("Process {} exited with {}", name, status),
                Err(e) => warn!("Could not collect exit status of {}: {}", name, e),
            }

            // The name may have been removed and registered again meanwhile
            match processes.lock().get_mut(&name) {
                Some(entry) if entry.incarnation == incarnation => entry.running = None,
                _ => debug!(
                    "Process {} incarnation {} is no longer registered",
                    name, incarnation
                ),
            }

            if !stop_requested {
                warn!("Process {} exited unexpectedly", name);
            }

            publish(
                &event_bus,
                SupervisorEvent::ProcessStopped {
                    process_name: name,
                    incarnation,
                    uptime: started_at.elapsed(),
                },
            )
            .await;
        });

        Ok(RunningProcess {
            kill: Some(kill_tx),
            booted: false,
        })
    }
}

async fn publish(event_bus: &EventBus, event: SupervisorEvent) {
    if let Err(e) = event_bus.publish(event).await {
        debug!("Supervisor event dropped: {}", e);
    }
}

enum StartAction {
    Launched,
    AcknowledgeBoot,
    AlreadyRunning,
}

#[async_trait]
impl ProcessSupervisor for LocalProcessSupervisor {
    async fn add_process(
        &self,
        process_name: &str,
        launch: &LaunchSpec,
    ) -> Result<ProcessIncarnation> {
        let incarnation = {
            let mut processes = self.processes.lock();
            if processes.contains_key(process_name) {
                return Err(HostControllerError::AlreadyRegistered {
                    process: process_name.to_string(),
                });
            }
            let incarnation = self.next_incarnation.fetch_add(1, Ordering::Relaxed);
            processes.insert(
                process_name.to_string(),
                ProcessEntry {
                    incarnation,
                    launch: launch.clone(),
                    running: None,
                },
            );
            incarnation
        };

        self.publish(SupervisorEvent::ProcessAdded {
            process_name: process_name.to_string(),
        })
        .await;
        Ok(incarnation)
    }

    async fn start_process(&self, process_name: &str) -> Result<()> {
        let action = {
            let mut processes = self.processes.lock();
            let entry = processes.get_mut(process_name).ok_or_else(|| {
                HostControllerError::supervisor(process_name, "process is not registered")
            })?;
            match entry.running.as_ref().map(|running| running.booted) {
                None => {
                    // Spawned under the lock so the exit watcher cannot run first
                    let running = self.spawn(process_name, entry.incarnation, &entry.launch)?;
                    entry.running = Some(running);
                    StartAction::Launched
                }
                Some(false) => {
                    if let Some(running) = entry.running.as_mut() {
                        running.booted = true;
                    }
                    StartAction::AcknowledgeBoot
                }
                Some(true) => StartAction::AlreadyRunning,
            }
        };

        match action {
            StartAction::Launched => {
                self.publish(SupervisorEvent::ProcessStarted {
                    process_name: process_name.to_string(),
                })
                .await;
                self.publish(SupervisorEvent::ServerAvailable {
                    process_name: process_name.to_string(),
                })
                .await;
            }
            StartAction::AcknowledgeBoot => {
                self.publish(SupervisorEvent::ServerStarted {
                    process_name: process_name.to_string(),
                })
                .await;
            }
            StartAction::AlreadyRunning => {
                debug!("Process {} is already running", process_name);
            }
        }
        Ok(())
    }

    async fn stop_process(&self, process_name: &str) -> Result<()> {
        let kill = self
            .processes
            .lock()
            .get_mut(process_name)
            .and_then(|entry| entry.running.as_mut())
            .and_then(|running| running.kill.take());

        match kill {
            Some(kill) => {
                debug!("Stopping process {}", process_name);
                let _ = kill.send(());
            }
            None => debug!("Process {} is not running", process_name),
        }
        Ok(())
    }

    async fn remove_process(&self, process_name: &str) -> Result<()> {
        let removed = self.processes.lock().remove(process_name);
        match removed {
            Some(entry) => {
                // Dropping the kill sender also stops a process still running
                drop(entry);
                self.publish(SupervisorEvent::ProcessRemoved {
                    process_name: process_name.to_string(),
                })
                .await;
            }
            None => debug!("Process {} was not registered", process_name),
        }
        Ok(())
    }

    async fn request_inventory(&self) -> Result<()> {
        let processes = self
            .processes
            .lock()
            .iter()
            .map(|(name, entry)| ProcessInfo {
                name: name.clone(),
                running: entry.running.is_some(),
            })
            .collect();

        self.publish(SupervisorEvent::Inventory { processes }).await;
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        let entries: Vec<(String, ProcessEntry)> = {
            let mut processes = self.processes.lock();
            std::mem::take(&mut *processes).into_iter().collect()
        };

        for (name, mut entry) in entries {
            if let Some(kill) = entry.running.as_mut().and_then(|r| r.kill.take()) {
                info!("Stopping {} on shutdown", name);
                if kill.send(()).is_err() {
                    debug!("Process {} already exited", name);
                }
            }
        }

        self.publish(SupervisorEvent::ConnectionFinished).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventFilter;
    use tokio::time::{timeout, Duration};

    fn sleeper() -> LaunchSpec {
        LaunchSpec {
            command: vec!["sleep".to_string(), "30".to_string()],
            ..LaunchSpec::default()
        }
    }

    #[tokio::test]
    async fn test_add_twice_is_rejected() {
        let bus = Arc::new(EventBus::new(16));
        let supervisor = LocalProcessSupervisor::new(bus);

        supervisor.add_process("Server:one", &sleeper()).await.unwrap();
        assert!(matches!(
            supervisor.add_process("Server:one", &sleeper()).await,
            Err(HostControllerError::AlreadyRegistered { .. })
        ));
    }

    #[tokio::test]
    async fn test_start_unregistered_fails() {
        let bus = Arc::new(EventBus::new(16));
        let supervisor = LocalProcessSupervisor::new(bus);

        assert!(supervisor.start_process("Server:ghost").await.is_err());
    }

    #[tokio::test]
    async fn test_empty_command_fails_to_launch() {
        let bus = Arc::new(EventBus::new(16));
        let supervisor = LocalProcessSupervisor::new(bus);

        supervisor
            .add_process("Server:one", &LaunchSpec::default())
            .await
            .unwrap();
        assert!(matches!(
            supervisor.start_process("Server:one").await,
            Err(HostControllerError::Supervisor { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_lifecycle_events() {
        let bus = Arc::new(EventBus::new(64));
        let mut receiver = bus.receiver(
            EventFilter::EventTypes(vec![
                "server_available",
                "server_started",
                "process_stopped",
            ]),
            "test",
        );
        let supervisor = LocalProcessSupervisor::new(Arc::clone(&bus));

        supervisor.add_process("Server:one", &sleeper()).await.unwrap();
        supervisor.start_process("Server:one").await.unwrap();
        assert_eq!(supervisor.running_count(), 1);

        let available = timeout(Duration::from_secs(5), receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(available.event_type(), "server_available");

        // Second start acknowledges the boot
        supervisor.start_process("Server:one").await.unwrap();
        let started = timeout(Duration::from_secs(5), receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(started.event_type(), "server_started");

        supervisor.stop_process("Server:one").await.unwrap();
        let stopped = timeout(Duration::from_secs(5), receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stopped.event_type(), "process_stopped");
        assert_eq!(stopped.process_name(), Some("Server:one"));
        assert_eq!(supervisor.running_count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unexpected_exit_is_reported() {
        let bus = Arc::new(EventBus::new(64));
        let mut receiver = bus.receiver(EventFilter::EventTypes(vec!["process_stopped"]), "test");
        let supervisor = LocalProcessSupervisor::new(Arc::clone(&bus));

        let launch = LaunchSpec {
            command: vec!["true".to_string()],
            ..LaunchSpec::default()
        };
        supervisor.add_process("Server:short", &launch).await.unwrap();
        supervisor.start_process("Server:short").await.unwrap();

        let stopped = timeout(Duration::from_secs(5), receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stopped.process_name(), Some("Server:short"));
        assert_eq!(supervisor.running_count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_of_removed_incarnation_leaves_new_one_running() {
        let bus = Arc::new(EventBus::new(64));
        let mut receiver = bus.receiver(EventFilter::EventTypes(vec!["process_stopped"]), "test");
        let supervisor = LocalProcessSupervisor::new(Arc::clone(&bus));

        let first = supervisor.add_process("Server:one", &sleeper()).await.unwrap();
        supervisor.start_process("Server:one").await.unwrap();
        supervisor.stop_process("Server:one").await.unwrap();
        supervisor.remove_process("Server:one").await.unwrap();

        let second = supervisor.add_process("Server:one", &sleeper()).await.unwrap();
        assert_ne!(first, second);
        supervisor.start_process("Server:one").await.unwrap();

        let stopped = timeout(Duration::from_secs(5), receiver.recv())
            .await
            .unwrap()
            .unwrap();
        match stopped {
            SupervisorEvent::ProcessStopped { incarnation, .. } => {
                assert_eq!(incarnation, first)
            }
            other => panic!("Unexpected event: {:?}", other),
        }

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(supervisor.running_count(), 1);

        // The new process can still be stopped
        supervisor.stop_process("Server:one").await.unwrap();
        let stopped = timeout(Duration::from_secs(5), receiver.recv())
            .await
            .unwrap()
            .unwrap();
        match stopped {
            SupervisorEvent::ProcessStopped { incarnation, .. } => {
                assert_eq!(incarnation, second)
            }
            other => panic!("Unexpected event: {:?}", other),
        }
        assert_eq!(supervisor.running_count(), 0);
    }

    #[tokio::test]
    async fn test_inventory_and_shutdown() {
        let bus = Arc::new(EventBus::new(16));
        let mut receiver = bus.receiver(
            EventFilter::EventTypes(vec!["inventory", "connection_finished"]),
            "test",
        );
        let supervisor = LocalProcessSupervisor::new(Arc::clone(&bus));

        supervisor.add_process("Server:one", &sleeper()).await.unwrap();
        supervisor.request_inventory().await.unwrap();

        match receiver.recv().await.unwrap() {
            SupervisorEvent::Inventory { processes } => {
                assert_eq!(
                    processes,
                    vec![ProcessInfo {
                        name: "Server:one".to_string(),
                        running: false
                    }]
                );
            }
            other => panic!("Unexpected event: {:?}", other),
        }

        supervisor.shutdown().await.unwrap();
        assert_eq!(
            receiver.recv().await.unwrap(),
            SupervisorEvent::ConnectionFinished
        );
    }
}
