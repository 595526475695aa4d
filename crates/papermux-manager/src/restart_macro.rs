use std::time::Duration;

use crate::console;
use crate::error::ManagerError;
use crate::lifecycle::Manager;
use crate::session::{SessionController, SessionCreator};
use crate::support::{Pacer, format_error_chain};

/// Countdown broadcast before a scheduled restart: (label, seconds until the
/// next step). Labels describe the time left, not the pause that follows.
pub const RESTART_STEPS: &[(&str, u64)] = &[
    ("10 minutes", 300),
    ("5 minutes", 120),
    ("3 minutes", 60),
    ("2 minutes", 60),
    ("1 minute", 30),
    ("30 seconds", 15),
    ("15 seconds", 10),
    ("5 seconds", 1),
    ("4 seconds", 1),
    ("3 seconds", 1),
    ("2 seconds", 1),
    ("1 seconds", 1),
];

pub fn countdown_total() -> Duration {
    Duration::from_secs(RESTART_STEPS.iter().map(|(_, secs)| secs).sum())
}

impl<C, F, P> Manager<C, F, P>
where
    C: SessionController,
    F: SessionCreator,
    P: Pacer,
{
    /// Runs the full countdown, then stop and start. Blocks for the whole
    /// countdown; there is no way to cancel short of killing the process.
    pub async fn restart_macro(&self) -> Result<(), ManagerError> {
        let name = &self.config.session_name;
        tracing::warn!(
            total_secs = countdown_total().as_secs(),
            "restart macro blocks for the whole countdown and is meant to be scheduled"
        );
        tracing::info!(session = %name, "starting server restart macro");

        let surface = self.running_surface().await?;
        tracing::info!(session = %name, "connected to session");

        for (label, secs) in RESTART_STEPS {
            tracing::info!("{label} to restart");
            self.controller
                .send_keys(&surface, &console::restart_notice(label), true)
                .await?;
            self.pacer.pause(Duration::from_secs(*secs)).await;
        }

        if let Err(e) = self.stop().await {
            tracing::error!(error = %format_error_chain(&e), "restart macro: stop failed, continuing");
        }
        if let Err(e) = self.start().await {
            tracing::error!(error = %format_error_chain(&e), "restart macro: start failed");
        }
        Ok(())
    }
}
