//! # Voice Service
//!
//! Runs a `VoiceController` on its own task and hands out cloneable
//! `VoiceHandle`s to the HTTP layer.
//!
//! ## Task Loop:
//! One `tokio::select!` over the command channel and the controller's own
//! inputs, so a start/stop request and a transport event are never handled
//! at the same time.

use crate::session::controller::{VoiceConfig, VoiceController};
use crate::session::status::{SessionStats, SessionStatus, StatsSnapshot};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("voice service is not running")]
    Unavailable,
}

/// Reply to a start request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StartOutcome {
    /// `false` when a session was already connecting or active.
    pub accepted: bool,
    pub status: SessionStatus,
}

#[derive(Debug)]
enum Command {
    Start(oneshot::Sender<StartOutcome>),
    Stop(oneshot::Sender<SessionStatus>),
    Reconfigure(VoiceConfig),
    Shutdown,
}

/// Cloneable access to the running voice service.
#[derive(Debug, Clone)]
pub struct VoiceHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<SessionStatus>,
    stats: Arc<SessionStats>,
}

impl VoiceHandle {
    pub async fn start(&self) -> Result<StartOutcome, ServiceError> {
        let (reply, outcome) = oneshot::channel();
        self.send(Command::Start(reply)).await?;
        outcome.await.map_err(|_| ServiceError::Unavailable)
    }

    /// Stop the session. Devices are released by the time this returns.
    pub async fn stop(&self) -> Result<SessionStatus, ServiceError> {
        let (reply, status) = oneshot::channel();
        self.send(Command::Stop(reply)).await?;
        status.await.map_err(|_| ServiceError::Unavailable)
    }

    /// Replace the configuration used by the next session.
    pub async fn reconfigure(&self, config: VoiceConfig) -> Result<(), ServiceError> {
        self.send(Command::Reconfigure(config)).await
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// Receiver that observes every status transition.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Stop any session and end the service task.
    pub async fn shutdown(&self) {
        if self.commands.send(Command::Shutdown).await.is_ok() {
            self.commands.closed().await;
        }
    }

    async fn send(&self, command: Command) -> Result<(), ServiceError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ServiceError::Unavailable)
    }
}

pub struct VoiceService;

impl VoiceService {
    /// Move the controller onto a new task. Must be called inside a tokio runtime.
    pub fn spawn(controller: VoiceController) -> VoiceHandle {
        let (commands, receiver) = mpsc::channel(32);
        let handle = VoiceHandle {
            commands,
            status: controller.subscribe(),
            stats: controller.stats(),
        };
        tokio::spawn(run(controller, receiver));
        handle
    }
}

async fn run(mut controller: VoiceController, mut commands: mpsc::Receiver<Command>) {
    info!("Voice service started");
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Start(reply)) => {
                    let accepted = controller.start();
                    let _ = reply.send(StartOutcome {
                        accepted,
                        status: controller.status(),
                    });
                }
                Some(Command::Stop(reply)) => {
                    controller.stop();
                    let _ = reply.send(controller.status());
                }
                Some(Command::Reconfigure(config)) => controller.set_config(config),
                Some(Command::Shutdown) | None => {
                    debug!("Voice service shutting down");
                    controller.stop();
                    break;
                }
            },
            input = controller.next_input() => controller.dispatch(input),
        }
    }
    info!("Voice service stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::transport::TransportEvent;
    use crate::session::status::SessionState;
    use crate::session::testing::{FakeConnector, FakeInput, FakeOutputDevice};
    use std::time::Duration;

    fn spawn() -> (VoiceHandle, Arc<FakeInput>, Arc<FakeConnector>) {
        let input = Arc::new(FakeInput::default());
        let connector = Arc::new(FakeConnector::default());
        let controller = VoiceController::new(
            VoiceConfig::default(),
            input.clone(),
            Arc::new(FakeOutputDevice::new()),
            connector.clone(),
        );
        (VoiceService::spawn(controller), input, connector)
    }

    async fn wait_for_state(handle: &VoiceHandle, state: SessionState) {
        let mut updates = handle.subscribe();
        tokio::time::timeout(Duration::from_secs(1), updates.wait_for(|s| s.state == state))
            .await
            .expect("timed out waiting for state")
            .expect("service stopped");
    }

    #[tokio::test]
    async fn test_start_open_stop_round_trip() {
        let (handle, input, connector) = spawn();

        let outcome = handle.start().await.unwrap();
        assert!(outcome.accepted);
        assert_eq!(outcome.status.state, SessionState::Connecting);

        connector.send(0, TransportEvent::Open);
        wait_for_state(&handle, SessionState::Active).await;
        assert_eq!(handle.status().message, "Nexus is listening...");

        let second = handle.start().await.unwrap();
        assert!(!second.accepted);
        assert_eq!(second.status.state, SessionState::Active);

        let stopped = handle.stop().await.unwrap();
        assert_eq!(stopped.state, SessionState::Standby);
        assert_eq!(input.released(), 1);
        assert_eq!(handle.stats().sessions_started, 1);
    }

    #[tokio::test]
    async fn test_reconfigure_applies_to_next_session() {
        let (handle, _input, connector) = spawn();

        let mut config = VoiceConfig::default();
        config.live.voice = "Puck".to_string();
        handle.reconfigure(config).await.unwrap();
        handle.start().await.unwrap();

        assert_eq!(connector.config(0).voice, "Puck");
    }

    #[tokio::test]
    async fn test_handle_reports_unavailable_after_shutdown() {
        let (handle, _input, _connector) = spawn();
        handle.shutdown().await;

        assert_eq!(handle.start().await, Err(ServiceError::Unavailable));
        assert_eq!(handle.stop().await, Err(ServiceError::Unavailable));
    }
}
