//! Radio manager.
//!
//! Holds everything the config flow and migration learn about a radio: the
//! picked port, the detected driver, the live network settings and the known
//! backups. Every hardware touch goes through a short-lived connect scope
//! that shuts the radio down and lets it settle before the next open.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use homelink_core::PortConfig;

use crate::backup::NetworkBackup;
use crate::radio::{ProbeOutcome, RadioApp, RadioController, RadioError, RadioType, Result};

/// Settle time after closing a radio connection. Some sticks need a moment
/// before they accept the next open.
pub const CONNECT_DELAY: Duration = Duration::from_millis(1500);

/// Delay between retries of a failed radio operation.
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Mutable radio state shared by the config flow and the migration helper.
pub struct RadioManager {
    controller: Arc<dyn RadioController>,
    /// Serial port the radio is (or will be) reached on.
    pub device_settings: Option<PortConfig>,
    /// Detected or manually picked driver.
    pub radio_type: Option<RadioType>,
    /// Live network state read from the radio, `None` when not formed.
    pub current_settings: Option<NetworkBackup>,
    /// Known backups, newest first.
    pub backups: Vec<NetworkBackup>,
    /// Backup picked for restore, if any.
    pub chosen_backup: Option<NetworkBackup>,
}

impl RadioManager {
    pub fn new(controller: Arc<dyn RadioController>) -> Self {
        Self {
            controller,
            device_settings: None,
            radio_type: None,
            current_settings: None,
            backups: Vec::new(),
            chosen_backup: None,
        }
    }

    pub fn with_port(mut self, port: PortConfig) -> Self {
        self.device_settings = Some(port);
        self
    }

    pub fn with_radio_type(mut self, radio_type: RadioType) -> Self {
        self.radio_type = Some(radio_type);
        self
    }

    /// The configured device path, if a port has been picked.
    pub fn device_path(&self) -> Option<&str> {
        self.device_settings.as_ref().map(|p| p.path.as_str())
    }

    /// Probe the drivers in priority order against the picked port.
    ///
    /// A probe may hand back corrected port settings, which replace the
    /// current ones wholesale. Probe failures are logged and skipped.
    /// `Ok(false)` means no driver matched and the user picks manually.
    pub async fn detect_radio_type(&mut self) -> Result<bool> {
        let port = self
            .device_settings
            .clone()
            .ok_or_else(|| RadioError::Internal("no serial port selected".to_string()))?;

        for radio_type in RadioType::ALL {
            debug!(radio_type = %radio_type, path = %port.path, "probing radio type");
            match self.controller.probe(radio_type, &port).await {
                Ok(ProbeOutcome::Match) => {
                    debug!(radio_type = %radio_type, "probe was successful");
                    self.radio_type = Some(radio_type);
                    return Ok(true);
                }
                Ok(ProbeOutcome::MatchWithSettings(settings)) => {
                    debug!(radio_type = %radio_type, ?settings, "probe returned new settings");
                    self.device_settings = Some(settings);
                    self.radio_type = Some(radio_type);
                    return Ok(true);
                }
                Ok(ProbeOutcome::NoMatch) => {}
                Err(err) => {
                    warn!(radio_type = %radio_type, error = %err, "radio probe failed");
                }
            }
        }
        Ok(false)
    }

    /// Open the radio, run `f`, then shut down and let the stick settle.
    ///
    /// Shutdown and the settle delay run whether or not `f` succeeded.
    async fn with_connected_app<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Arc<dyn RadioApp>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let radio_type = self
            .radio_type
            .ok_or_else(|| RadioError::Internal("no radio type selected".to_string()))?;
        let port = self
            .device_settings
            .as_ref()
            .ok_or_else(|| RadioError::Internal("no serial port selected".to_string()))?;

        let app = self.controller.connect(radio_type, port).await?;
        let result = f(app.clone()).await;

        if let Err(err) = app.shutdown().await {
            warn!(error = %err, "radio shutdown failed");
        }
        tokio::time::sleep(CONNECT_DELAY).await;
        result
    }

    /// Read the radio's network settings and refresh the backup list.
    ///
    /// A radio with no formed network is not an error: `current_settings`
    /// becomes `None` and the backup history is still refreshed. With
    /// `create_backup` set, a formed network is captured as a new backup,
    /// which is returned.
    pub async fn async_load_network_settings(
        &mut self,
        create_backup: bool,
    ) -> Result<Option<NetworkBackup>> {
        let (settings, backups, new_backup) = self
            .with_connected_app(|app| async move {
                let settings = match app.load_network_state().await {
                    Ok(state) => Some(state),
                    Err(RadioError::NetworkNotFormed) => None,
                    Err(err) => return Err(err),
                };
                let backups = app.backups().await?;
                let new_backup = if create_backup && settings.is_some() {
                    Some(app.create_backup().await?)
                } else {
                    None
                };
                Ok((settings, backups, new_backup))
            })
            .await?;

        self.current_settings = settings;
        self.backups = backups;
        if let Some(backup) = &new_backup {
            self.backups.insert(0, backup.clone());
        }
        Ok(new_backup)
    }

    /// Capture the current network as a new backup.
    pub async fn async_create_backup(&mut self) -> Result<NetworkBackup> {
        let backup = self
            .with_connected_app(|app| async move { app.create_backup().await })
            .await?;
        self.current_settings = Some(backup.clone());
        self.backups.insert(0, backup.clone());
        Ok(backup)
    }

    /// Write a backup onto the radio.
    ///
    /// A no-op when the radio's current settings already supersede the
    /// backup, so restoring the same backup twice touches the hardware once.
    pub async fn async_restore_backup(
        &mut self,
        backup: &NetworkBackup,
        overwrite_ieee: bool,
    ) -> Result<()> {
        if let Some(current) = &self.current_settings {
            if current.supersedes(backup) {
                debug!("not restoring backup, current settings supersede it");
                return Ok(());
            }
        }

        let to_restore = backup.clone();
        self.with_connected_app(|app| async move {
            app.restore_backup(&to_restore, overwrite_ieee).await
        })
        .await?;
        self.current_settings = Some(backup.clone());
        Ok(())
    }

    /// Form a brand-new network on the radio.
    pub async fn async_form_network(&mut self) -> Result<()> {
        self.with_connected_app(|app| async move { app.form_network().await })
            .await
    }

    /// Wipe the radio's network state.
    pub async fn async_reset_adapter(&mut self) -> Result<()> {
        self.with_connected_app(|app| async move { app.reset_network_info().await })
            .await?;
        self.current_settings = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::test_backup;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeRadio {
        /// Which radio type the fake device answers to.
        answers_to: Option<RadioType>,
        probe_settings: Mutex<Option<PortConfig>>,
        probe_errors: bool,
        network: Mutex<Option<NetworkBackup>>,
        connect_fails: bool,
        connects: AtomicUsize,
        restores: AtomicUsize,
        shutdowns: AtomicUsize,
    }

    #[async_trait]
    impl RadioController for Arc<FakeRadio> {
        async fn probe(&self, radio_type: RadioType, _port: &PortConfig) -> Result<ProbeOutcome> {
            if self.probe_errors {
                return Err(RadioError::Probe("port busy".to_string()));
            }
            if Some(radio_type) != self.answers_to {
                return Ok(ProbeOutcome::NoMatch);
            }
            match self.probe_settings.lock().unwrap().take() {
                Some(settings) => Ok(ProbeOutcome::MatchWithSettings(settings)),
                None => Ok(ProbeOutcome::Match),
            }
        }

        async fn connect(
            &self,
            _radio_type: RadioType,
            _port: &PortConfig,
        ) -> Result<Arc<dyn RadioApp>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.connect_fails {
                return Err(RadioError::Io("serial port gone".to_string()));
            }
            Ok(self.clone())
        }
    }

    #[async_trait]
    impl RadioApp for FakeRadio {
        async fn load_network_state(&self) -> Result<NetworkBackup> {
            self.network
                .lock()
                .unwrap()
                .clone()
                .ok_or(RadioError::NetworkNotFormed)
        }

        async fn backups(&self) -> Result<Vec<NetworkBackup>> {
            Ok(Vec::new())
        }

        async fn create_backup(&self) -> Result<NetworkBackup> {
            self.load_network_state().await
        }

        async fn restore_backup(
            &self,
            backup: &NetworkBackup,
            _overwrite_ieee: bool,
        ) -> Result<()> {
            self.restores.fetch_add(1, Ordering::SeqCst);
            *self.network.lock().unwrap() = Some(backup.clone());
            Ok(())
        }

        async fn form_network(&self) -> Result<()> {
            *self.network.lock().unwrap() = Some(test_backup(0));
            Ok(())
        }

        async fn reset_network_info(&self) -> Result<()> {
            *self.network.lock().unwrap() = None;
            Ok(())
        }

        async fn shutdown(&self) -> Result<()> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn manager(radio: &Arc<FakeRadio>) -> RadioManager {
        RadioManager::new(Arc::new(radio.clone()))
            .with_port(PortConfig::new("/dev/ttyUSB0"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_detect_walks_priority_order() {
        let radio = Arc::new(FakeRadio {
            answers_to: Some(RadioType::Znp),
            ..Default::default()
        });
        let mut mgr = manager(&radio);

        assert!(mgr.detect_radio_type().await.unwrap());
        assert_eq!(mgr.radio_type, Some(RadioType::Znp));
    }

    #[tokio::test(start_paused = true)]
    async fn test_detect_replaces_settings_from_probe() {
        let radio = Arc::new(FakeRadio {
            answers_to: Some(RadioType::Ezsp),
            probe_settings: Mutex::new(Some(
                PortConfig::new("/dev/ttyUSB0").with_baudrate(57_600),
            )),
            ..Default::default()
        });
        let mut mgr = manager(&radio);

        assert!(mgr.detect_radio_type().await.unwrap());
        assert_eq!(mgr.device_settings.as_ref().unwrap().baudrate, 57_600);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detect_probe_errors_fall_through_to_manual() {
        let radio = Arc::new(FakeRadio {
            answers_to: Some(RadioType::Znp),
            probe_errors: true,
            ..Default::default()
        });
        let mut mgr = manager(&radio);

        assert!(!mgr.detect_radio_type().await.unwrap());
        assert_eq!(mgr.radio_type, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_settings_swallows_unformed_network() {
        let radio = Arc::new(FakeRadio::default());
        let mut mgr = manager(&radio).with_radio_type(RadioType::Znp);

        let created = mgr.async_load_network_settings(true).await.unwrap();
        assert!(created.is_none());
        assert!(mgr.current_settings.is_none());
        // The radio is always shut down again, even with nothing to read.
        assert_eq!(radio.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_skipped_when_current_supersedes() {
        let radio = Arc::new(FakeRadio::default());
        let mut mgr = manager(&radio).with_radio_type(RadioType::Znp);
        mgr.current_settings = Some(test_backup(200));

        mgr.async_restore_backup(&test_backup(100), false).await.unwrap();
        assert_eq!(radio.restores.load(Ordering::SeqCst), 0);
        assert_eq!(radio.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_twice_touches_hardware_once() {
        let radio = Arc::new(FakeRadio::default());
        let mut mgr = manager(&radio).with_radio_type(RadioType::Znp);

        let backup = test_backup(100);
        mgr.async_restore_backup(&backup, false).await.unwrap();
        mgr.async_restore_backup(&backup, false).await.unwrap();
        assert_eq!(radio.restores.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_wipes_network_state() {
        let radio = Arc::new(FakeRadio::default());
        let mut mgr = manager(&radio).with_radio_type(RadioType::Znp);

        mgr.async_form_network().await.unwrap();
        mgr.async_load_network_settings(false).await.unwrap();
        assert!(mgr.current_settings.is_some());

        mgr.async_reset_adapter().await.unwrap();
        assert!(mgr.current_settings.is_none());
        assert!(radio.network.lock().unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_error_propagates() {
        let radio = Arc::new(FakeRadio {
            connect_fails: true,
            ..Default::default()
        });
        let mut mgr = manager(&radio).with_radio_type(RadioType::Znp);

        let err = mgr.async_form_network().await.unwrap_err();
        assert!(matches!(err, RadioError::Io(_)));
    }
}
