//! Start/stop of the server inside its tmux session.
//!
//! There is no persisted state: every operation re-derives it from whether
//! the session exists. The existence check is advisory; the invocation lock
//! taken in `main` is what keeps two managers from racing each other.

use std::time::Duration;

use papermux_process::ServerState;

use crate::artifact::{Artifact, SyncOutcome, Synchronizer};
use crate::config::{Config, StopWait};
use crate::console;
use crate::error::{ManagerError, SessionError};
use crate::launch::resolve_launch_spec;
use crate::session::{DirectCreate, SessionController, SessionCreator, Surface};
use crate::support::{Pacer, format_error_chain};

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Everything one command needs, passed explicitly instead of living in
/// process-wide globals.
pub struct Manager<C, F, P> {
    pub(crate) config: Config,
    pub(crate) controller: C,
    pub(crate) fallback: F,
    pub(crate) sync: Synchronizer,
    pub(crate) pacer: P,
}

impl<C, F, P> Manager<C, F, P>
where
    C: SessionController,
    F: SessionCreator,
    P: Pacer,
{
    pub fn new(config: Config, controller: C, fallback: F, pacer: P) -> Result<Self, ManagerError> {
        let sync = Synchronizer::from_config(&config)?;
        Ok(Self {
            config,
            controller,
            fallback,
            sync,
            pacer,
        })
    }

    /// Returns once the launch command has been typed; whether the server
    /// actually comes up is not observed.
    pub async fn start(&self) -> Result<Artifact, ManagerError> {
        let name = &self.config.session_name;
        let channel = &self.config.target_version;
        tracing::info!(session = %name, %channel, "attempting to start server");

        // Best-effort: a jar already on disk is good enough to start from.
        match self.sync.sync_latest(channel).await {
            Ok(outcome @ SyncOutcome::Downloaded(_)) => {
                tracing::info!(file = %outcome.artifact().file_name, "server jar updated");
            }
            Ok(outcome) => {
                tracing::debug!(file = %outcome.artifact().file_name, "server jar up to date");
            }
            Err(e) => {
                tracing::warn!(
                    error = %format_error_chain(&e),
                    "could not update server jar, using local artifacts"
                );
            }
        }

        let store = self.sync.store();
        let Some(artifact) = store.resolve_latest(channel)? else {
            tracing::error!(dir = %store.dir().display(), %channel, "no server jar on disk");
            return Err(ManagerError::NoArtifactAvailable(channel.clone()));
        };
        tracing::info!(file = %artifact.file_name, "selected server jar");

        let backend_up = match self.controller.session_exists(name).await {
            Ok(exists) => {
                let state = ServerState::observed(exists);
                if !state.can_start() {
                    return Err(ManagerError::AlreadyRunning(name.clone()));
                }
                tracing::info!(session = %name, %state, "tmux server is running, session is not live");
                true
            }
            Err(SessionError::BackendUnavailable(reason)) => {
                tracing::info!(%reason, "tmux server is not live, creating session via command");
                false
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!(session = %name, state = %ServerState::Starting, "creating session");
        if backend_up {
            self.create_with(&DirectCreate(&self.controller)).await?;
        } else {
            self.create_with(&self.fallback).await?;
        }

        // The new pane is not addressable immediately.
        self.pacer.pause(self.config.settle_delay).await;

        let surface = self.controller.active_surface(name).await?;
        let launch = resolve_launch_spec(
            &self.config.java_command,
            &self.config.server_args,
            &artifact.path,
        );
        let line = launch.command_line();
        tracing::info!(command = %line, "connected to session, starting server");
        self.controller.send_keys(&surface, &line, true).await?;

        tracing::info!(session = %name, state = %ServerState::Running, "server launched within tmux session");
        Ok(artifact)
    }

    async fn create_with(&self, creator: &impl SessionCreator) -> Result<(), ManagerError> {
        let name = &self.config.session_name;
        match creator.create(name).await {
            Ok(()) => {
                tracing::info!(session = %name, path = creator.describe(), "session created");
                Ok(())
            }
            // Someone created it between our check and now.
            Err(SessionError::AlreadyExists(n)) => Err(ManagerError::AlreadyRunning(n)),
            Err(e) => Err(e.into()),
        }
    }

    /// Resolves the pane of a live session, or explains why there is none.
    pub(crate) async fn running_surface(&self) -> Result<Surface, ManagerError> {
        self.ensure_running().await?;
        Ok(self.controller.active_surface(&self.config.session_name).await?)
    }

    async fn ensure_running(&self) -> Result<(), ManagerError> {
        let name = &self.config.session_name;
        let exists = match self.controller.session_exists(name).await {
            Ok(v) => v,
            Err(SessionError::BackendUnavailable(reason)) => {
                tracing::error!(%reason, "tmux server is not live");
                return Err(ManagerError::BackendUnavailable);
            }
            Err(e) => return Err(e.into()),
        };
        if !ServerState::observed(exists).can_stop() {
            return Err(ManagerError::NotRunning(name.clone()));
        }
        Ok(())
    }

    /// Asks the server to stop, waits, then kills the session regardless of
    /// whether the server finished saving.
    pub async fn stop(&self) -> Result<(), ManagerError> {
        let name = &self.config.session_name;
        tracing::info!(session = %name, "attempting to stop server");

        self.ensure_running().await?;
        // Once the session is known to exist it gets killed, even if the
        // stop command never reached the server.
        let delivered = self.request_shutdown().await;
        if let Err(e) = &delivered {
            tracing::warn!(
                session = %name,
                error = %format_error_chain(e),
                "could not deliver stop command, killing the session anyway"
            );
        }

        tracing::info!(session = %name, "killing tmux session");
        self.controller.kill_session(name).await?;
        tracing::info!(session = %name, state = %ServerState::Stopped, "session has been killed");
        Ok(delivered?)
    }

    async fn request_shutdown(&self) -> Result<(), SessionError> {
        let name = &self.config.session_name;
        let surface = self.controller.active_surface(name).await?;
        tracing::info!(session = %name, state = %ServerState::Stopping, "connected to session, stopping server");
        self.controller
            .send_keys(&surface, &console::shutdown_notice(), true)
            .await?;
        self.controller
            .send_keys(&surface, console::STOP_COMMAND, true)
            .await?;
        self.wait_for_exit(&surface).await;
        Ok(())
    }

    /// The kill that follows is unconditional, so a server still saving
    /// when the grace period ends loses data.
    async fn wait_for_exit(&self, surface: &Surface) {
        let grace = self.config.stop_grace;
        match self.config.stop_wait {
            StopWait::Fixed => self.pacer.pause(grace).await,
            StopWait::Poll => {
                let server = server_program(&self.config.java_command);
                let mut waited = Duration::ZERO;
                while waited < grace {
                    let step = STOP_POLL_INTERVAL.min(grace - waited);
                    self.pacer.pause(step).await;
                    waited += step;
                    match self.controller.foreground_command(surface).await {
                        Ok(cmd) if cmd != server => {
                            tracing::info!(foreground = %cmd, waited_ms = waited.as_millis() as u64, "server process has exited");
                            return;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::debug!(error = %e, "could not inspect pane");
                        }
                    }
                }
                tracing::warn!(
                    grace_ms = grace.as_millis() as u64,
                    "server still running after the grace period, killing the session may lose unsaved data"
                );
            }
        }
    }
}

/// Executable name tmux reports as `pane_current_command` while the server
/// runs, e.g. `java` for `/usr/bin/env java`.
fn server_program(java_command: &str) -> String {
    let last = java_command.split_whitespace().last().unwrap_or("java");
    last.rsplit('/').next().unwrap_or(last).to_string()
}
