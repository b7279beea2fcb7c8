//! Add-on manager contract and waiting helpers.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Poll interval while waiting for an add-on to reach a state.
pub const ADDON_STATE_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Maximum number of poll rounds (15 minutes at the poll interval).
pub const ADDON_SETUP_TIMEOUT_ROUNDS: usize = 300;

/// Installation/run state of an add-on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddonState {
    NotInstalled,
    NotRunning,
    Running,
}

/// Snapshot of an add-on as reported by the supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddonInfo {
    /// Whether the add-on is available in the store.
    pub available: bool,
    /// Hostname the add-on is reachable on when running.
    pub hostname: Option<String>,
    /// Current add-on options.
    pub options: Map<String, Value>,
    pub state: AddonState,
    pub update_available: bool,
    pub version: Option<String>,
}

impl AddonInfo {
    /// An available add-on that has not been installed yet.
    pub fn not_installed() -> Self {
        Self {
            available: true,
            hostname: None,
            options: Map::new(),
            state: AddonState::NotInstalled,
            update_available: false,
            version: None,
        }
    }
}

/// Add-on lifecycle errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AddonError {
    #[error("Failed to get add-on info: {0}")]
    Info(String),

    #[error("Failed to install add-on: {0}")]
    Install(String),

    #[error("Failed to start add-on: {0}")]
    Start(String),

    #[error("Failed to stop add-on: {0}")]
    Stop(String),

    #[error("Failed to uninstall add-on: {0}")]
    Uninstall(String),

    #[error("Failed to set add-on options: {0}")]
    SetOptions(String),

    #[error("Timed out waiting for add-on {addon}: {waiting_for}")]
    Timeout { addon: String, waiting_for: String },
}

/// Lifecycle contract for one supervisor-managed add-on.
///
/// The `schedule` methods only request the operation; callers that need the
/// add-on to reach a state use the [`WaitingAddon`] helpers.
#[async_trait]
pub trait AddonManager: Send + Sync {
    /// Human-readable add-on name, used in abort placeholders.
    fn addon_name(&self) -> &str;

    /// Store slug identifying the add-on.
    fn addon_slug(&self) -> &str;

    async fn async_get_addon_info(&self) -> Result<AddonInfo, AddonError>;

    async fn async_schedule_install_addon(&self) -> Result<(), AddonError>;

    async fn async_schedule_start_addon(&self) -> Result<(), AddonError>;

    async fn async_stop_addon(&self) -> Result<(), AddonError>;

    async fn async_uninstall_addon(&self) -> Result<(), AddonError>;

    async fn async_set_addon_options(&self, options: Map<String, Value>)
        -> Result<(), AddonError>;
}

/// Waiting operations layered over any [`AddonManager`].
#[async_trait]
pub trait WaitingAddon: AddonManager {
    /// Poll the add-on's info until it is in one of `states`.
    ///
    /// Bounded by [`ADDON_SETUP_TIMEOUT_ROUNDS`] rounds of
    /// [`ADDON_STATE_POLL_INTERVAL`], not a global deadline.
    async fn async_wait_until_addon_state(
        &self,
        states: &[AddonState],
    ) -> Result<(), AddonError> {
        for _ in 0..ADDON_SETUP_TIMEOUT_ROUNDS {
            let info = self.async_get_addon_info().await.ok();
            debug!(
                addon = %self.addon_slug(),
                ?states,
                current = ?info.as_ref().map(|i| i.state),
                "waiting for add-on state"
            );
            if let Some(info) = info {
                if states.contains(&info.state) {
                    return Ok(());
                }
            }
            tokio::time::sleep(ADDON_STATE_POLL_INTERVAL).await;
        }
        Err(AddonError::Timeout {
            addon: self.addon_slug().to_string(),
            waiting_for: format!("{states:?}"),
        })
    }

    /// Install the add-on and wait for it to be installed.
    async fn async_install_addon_waiting(&self) -> Result<(), AddonError> {
        self.async_schedule_install_addon().await?;
        self.async_wait_until_addon_state(&[AddonState::Running, AddonState::NotRunning])
            .await
    }

    /// Start the add-on and wait for it to be running.
    async fn async_start_addon_waiting(&self) -> Result<(), AddonError> {
        self.async_schedule_start_addon().await?;
        self.async_wait_until_addon_state(&[AddonState::Running]).await
    }

    /// Uninstall the add-on and wait for it to be gone.
    ///
    /// A no-op if the add-on is already uninstalled.
    async fn async_uninstall_addon_waiting(&self) -> Result<(), AddonError> {
        let info = self.async_get_addon_info().await.ok();
        if matches!(info, Some(ref i) if i.state == AddonState::NotInstalled) {
            return Ok(());
        }
        self.async_uninstall_addon().await?;
        self.async_wait_until_addon_state(&[AddonState::NotInstalled])
            .await
    }
}

impl<T: AddonManager + ?Sized> WaitingAddon for T {}
