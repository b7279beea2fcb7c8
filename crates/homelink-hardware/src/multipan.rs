//! Multiprotocol add-on option flow.
//!
//! Lets a hardware integration enable multi-PAN firmware on its radio: the
//! flow installs and configures the multiprotocol add-on, migrates an
//! existing Zigbee network onto the add-on's network socket, and later
//! reconfigures the shared channel or reverts to Zigbee-only firmware via
//! the flasher add-on.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use homelink_addon::{AddonError, AddonManager, AddonState, WaitingAddon};
use homelink_core::{HardwareServiceInfo, PortConfig};
use homelink_flow::{
    FlowError, FlowHandler, FormField, FormSchema, ProgressTask, Result, StepContext, StepResult,
};
use homelink_zigbee::{DiscoverySource, MigrationData, MigrationHelper};

use crate::channel::{ChannelManager, CHANNEL_CHANGE_DELAY, DEFAULT_CHANNEL};

/// Port the multiprotocol add-on exposes the Zigbee network socket on.
const ZIGBEE_SOCKET_PORT: u16 = 9999;

const STEPS: &[&str] = &[
    "on_supervisor",
    "addon_not_installed",
    "install_addon",
    "install_failed",
    "configure_addon",
    "start_addon",
    "start_failed",
    "finish_addon_setup",
    "addon_installed_other_device",
    "addon_menu",
    "change_channel",
    "notify_channel_change",
    "uninstall_addon",
    "install_flasher_addon",
    "configure_flasher_addon",
    "uninstall_multiprotocol_addon",
    "start_flasher_addon",
    "flasher_failed",
    "flashing_complete",
];

/// Serial settings of the radio as the add-ons expect them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialPortSettings {
    pub device: String,
    /// The add-on schema takes the baud rate as a string.
    pub baudrate: String,
    pub flow_control: bool,
}

impl SerialPortSettings {
    /// Options map for the multiprotocol add-on.
    pub fn to_addon_options(&self, autoflash_firmware: bool) -> Map<String, Value> {
        let mut options = Map::new();
        options.insert("device".to_string(), json!(self.device));
        options.insert("baudrate".to_string(), json!(self.baudrate));
        options.insert("flow_control".to_string(), json!(self.flow_control));
        options.insert("autoflash_firmware".to_string(), json!(autoflash_firmware));
        options
    }
}

/// What the flow needs to know about the hardware hosting the radio.
#[async_trait]
pub trait MultipanHardware: Send + Sync {
    /// Name shown in titles and placeholders.
    fn hardware_name(&self) -> &str;

    /// Serial settings of the on-board radio.
    async fn async_serial_port_settings(&self) -> SerialPortSettings;

    /// Discovery info of the radio as the Zigbee integration knows it, for
    /// migration matching.
    async fn async_radio_discovery_info(&self) -> DiscoverySource;
}

/// The Zigbee network socket of a running multiprotocol add-on.
pub fn get_zigbee_socket(hostname: &str) -> String {
    format!("socket://{hostname}:{ZIGBEE_SOCKET_PORT}")
}

/// Whether a device path points at the multiprotocol add-on rather than
/// physical hardware.
pub fn is_multiprotocol_path(path: &str) -> bool {
    path.starts_with("socket://")
}

/// Verify the multiprotocol add-on is usable: either absent or running.
pub async fn check_multipan_addon(addon: &dyn AddonManager) -> std::result::Result<(), AddonError> {
    let info = addon.async_get_addon_info().await?;
    match info.state {
        AddonState::NotInstalled | AddonState::Running => Ok(()),
        AddonState::NotRunning => Err(AddonError::Start(format!(
            "{} is installed but not running",
            addon.addon_name()
        ))),
    }
}

/// Whether the multiprotocol add-on is installed and configured for `device`.
pub async fn multipan_addon_using_device(
    addon: &dyn AddonManager,
    device: &str,
) -> std::result::Result<bool, AddonError> {
    let info = addon.async_get_addon_info().await?;
    if info.state == AddonState::NotInstalled {
        return Ok(false);
    }
    Ok(info.options.get("device").and_then(Value::as_str) == Some(device))
}

type AddonTask = ProgressTask<std::result::Result<(), AddonError>>;

/// The enable / reconfigure / disable multi-PAN wizard.
pub struct MultipanOptionsFlowHandler {
    hardware: Arc<dyn MultipanHardware>,
    addon: Arc<dyn AddonManager>,
    flasher: Arc<dyn AddonManager>,
    channels: Arc<ChannelManager>,
    /// Present when a Zigbee entry may need to move onto the add-on socket.
    migration: Option<MigrationHelper>,
    migration_initiated: bool,
    install_task: Option<AddonTask>,
    start_task: Option<AddonTask>,
    uninstall_task: Option<AddonTask>,
    flasher_install_task: Option<AddonTask>,
    flasher_start_task: Option<AddonTask>,
}

impl MultipanOptionsFlowHandler {
    pub fn new(
        hardware: Arc<dyn MultipanHardware>,
        addon: Arc<dyn AddonManager>,
        flasher: Arc<dyn AddonManager>,
        channels: Arc<ChannelManager>,
        migration: Option<MigrationHelper>,
    ) -> Self {
        Self {
            hardware,
            addon,
            flasher,
            channels,
            migration,
            migration_initiated: false,
            install_task: None,
            start_task: None,
            uninstall_task: None,
            flasher_install_task: None,
            flasher_start_task: None,
        }
    }

    fn entry_result(&self) -> StepResult {
        StepResult::create_entry(self.hardware.hardware_name(), json!({}))
    }

    fn addon_placeholders(addon: &dyn AddonManager) -> [(String, String); 1] {
        [("addon_name".to_string(), addon.addon_name().to_string())]
    }

    /// Drive one background add-on operation through its progress step.
    ///
    /// First dispatch spawns the task, re-entries while it runs re-render
    /// the progress indicator, and the final re-entry routes to `next_ok`
    /// or `next_err`.
    async fn drive_addon_task<F>(
        slot: &mut Option<AddonTask>,
        ctx: &mut StepContext,
        step_id: &'static str,
        spawn: F,
        next_ok: &'static str,
        next_err: &'static str,
    ) -> Result<StepResult>
    where
        F: FnOnce() -> AddonTask,
    {
        if slot.is_none() {
            let task = spawn();
            ctx.attach_progress(task.attachment());
            *slot = Some(task);
            return Ok(StepResult::show_progress(step_id, step_id));
        }

        if !slot.as_ref().is_some_and(|t| t.is_finished()) {
            return Ok(StepResult::show_progress(step_id, step_id));
        }

        let mut result = None;
        if let Some(task) = slot.take() {
            result = task.take_result().await;
        }
        match result {
            Some(Ok(())) => Ok(StepResult::show_progress_done(next_ok)),
            Some(Err(err)) => {
                warn!(step = step_id, error = %err, "add-on operation failed");
                Ok(StepResult::show_progress_done(next_err))
            }
            None => {
                warn!(step = step_id, "add-on operation produced no result");
                Ok(StepResult::show_progress_done(next_err))
            }
        }
    }

    async fn step_on_supervisor(&mut self) -> Result<StepResult> {
        let info = self.addon.async_get_addon_info().await.map_err(|err| {
            debug!(error = %err, "add-on info not available");
            FlowError::abort_with("addon_info_failed", Self::addon_placeholders(&*self.addon))
        })?;

        if info.state == AddonState::NotInstalled {
            return Ok(StepResult::form(
                "addon_not_installed",
                FormSchema::new(vec![
                    FormField::boolean("enable_multi_pan").with_default(json!(false))
                ]),
            ));
        }

        let settings = self.hardware.async_serial_port_settings().await;
        if info.options.get("device").and_then(Value::as_str) == Some(settings.device.as_str()) {
            Ok(StepResult::menu(
                "addon_menu",
                vec!["change_channel".to_string(), "uninstall_addon".to_string()],
            ))
        } else {
            // Installed, but serving some other radio; nothing to manage here.
            Ok(StepResult::form(
                "addon_installed_other_device",
                FormSchema::default(),
            ))
        }
    }

    async fn step_configure_addon(&mut self, input: Option<Value>) -> Result<StepResult> {
        let schema = FormSchema::new(vec![
            FormField::boolean("autoflash_firmware").with_default(json!(true))
        ]);
        let Some(input) = input else {
            return Ok(StepResult::form("configure_addon", schema));
        };
        let autoflash = input["autoflash_firmware"].as_bool().unwrap_or(true);

        let settings = self.hardware.async_serial_port_settings().await;
        self.addon
            .async_set_addon_options(settings.to_addon_options(autoflash))
            .await
            .map_err(|err| {
                warn!(error = %err, "setting multiprotocol add-on options failed");
                FlowError::abort_with(
                    "addon_set_config_failed",
                    Self::addon_placeholders(&*self.addon),
                )
            })?;

        if let Some(migration) = self.migration.as_mut() {
            let old = self.hardware.async_radio_discovery_info().await;
            let hostname = self
                .addon
                .async_get_addon_info()
                .await
                .ok()
                .and_then(|i| i.hostname)
                .unwrap_or_else(|| self.addon.addon_slug().replace('_', "-"));
            let data = MigrationData {
                old_discovery_info: old,
                new_discovery_info: HardwareServiceInfo {
                    name: self.hardware.hardware_name().to_string(),
                    port: PortConfig::new(get_zigbee_socket(&hostname)),
                    radio_type: "ezsp".to_string(),
                },
            };
            match migration.async_initiate_migration(data).await {
                Ok(initiated) => self.migration_initiated = initiated,
                Err(err) => {
                    warn!(error = %err, "zigbee migration could not be initiated");
                    return Err(FlowError::abort("zigbee_migration_failed"));
                }
            }
        }

        Ok(StepResult::show_progress_done("start_addon"))
    }

    async fn step_finish_addon_setup(&mut self) -> Result<StepResult> {
        if self.migration_initiated {
            if let Some(migration) = self.migration.as_mut() {
                migration.async_finish_migration().await.map_err(|err| {
                    warn!(error = %err, "zigbee migration could not be finished");
                    FlowError::abort("zigbee_migration_failed")
                })?;
            }
        }
        Ok(self.entry_result())
    }

    async fn step_change_channel(&mut self, input: Option<Value>) -> Result<StepResult> {
        let schema = FormSchema::new(vec![FormField::integer("channel")
            .required()
            .with_default(json!(DEFAULT_CHANNEL))]);
        let Some(input) = input else {
            return Ok(StepResult::form("change_channel", schema));
        };

        let channel = input["channel"]
            .as_u64()
            .and_then(|c| u8::try_from(c).ok())
            .unwrap_or(0);
        if self
            .channels
            .async_change_channel(channel, CHANNEL_CHANGE_DELAY)
            .await
            .is_err()
        {
            return Ok(StepResult::form_with_errors(
                "change_channel",
                schema,
                [("channel".to_string(), "invalid_channel".to_string())]
                    .into_iter()
                    .collect(),
            ));
        }

        // Tell the user the change only takes effect after the delay.
        Ok(StepResult::Form {
            step_id: "notify_channel_change".to_string(),
            schema: FormSchema::default(),
            errors: Default::default(),
            description_placeholders: [(
                "delay_minutes".to_string(),
                (CHANNEL_CHANGE_DELAY.as_secs() / 60).to_string(),
            )]
            .into_iter()
            .collect(),
        })
    }

    async fn step_uninstall_addon(&mut self, input: Option<Value>) -> Result<StepResult> {
        let Some(input) = input else {
            return Ok(StepResult::form(
                "uninstall_addon",
                FormSchema::new(vec![
                    FormField::boolean("disable_multi_pan").with_default(json!(false))
                ]),
            ));
        };
        if !input["disable_multi_pan"].as_bool().unwrap_or(false) {
            return Ok(self.entry_result());
        }
        // Reverting needs Zigbee-only firmware back on the radio; the
        // flasher add-on takes care of that once the multiprotocol add-on
        // no longer holds the port.
        Ok(StepResult::show_progress_done("install_flasher_addon"))
    }

    async fn step_configure_flasher_addon(&mut self) -> Result<StepResult> {
        let settings = self.hardware.async_serial_port_settings().await;
        self.flasher
            .async_set_addon_options(settings.to_addon_options(true))
            .await
            .map_err(|err| {
                warn!(error = %err, "setting flasher add-on options failed");
                FlowError::abort_with(
                    "addon_set_config_failed",
                    Self::addon_placeholders(&*self.flasher),
                )
            })?;
        Ok(StepResult::show_progress_done("uninstall_multiprotocol_addon"))
    }
}

#[async_trait]
impl FlowHandler for MultipanOptionsFlowHandler {
    fn domain(&self) -> &str {
        "multiprotocol"
    }

    fn step_ids(&self) -> &'static [&'static str] {
        STEPS
    }

    fn initial_step(&self) -> &'static str {
        "on_supervisor"
    }

    async fn handle_step(
        &mut self,
        step_id: &str,
        user_input: Option<Value>,
        ctx: &mut StepContext,
    ) -> Result<StepResult> {
        match step_id {
            "on_supervisor" => self.step_on_supervisor().await,
            "addon_not_installed" => match user_input {
                Some(input) if input["enable_multi_pan"].as_bool().unwrap_or(false) => {
                    Ok(StepResult::show_progress_done("install_addon"))
                }
                Some(_) => Ok(self.entry_result()),
                None => Ok(StepResult::form(
                    "addon_not_installed",
                    FormSchema::new(vec![
                        FormField::boolean("enable_multi_pan").with_default(json!(false))
                    ]),
                )),
            },
            "install_addon" => {
                let addon = self.addon.clone();
                Self::drive_addon_task(
                    &mut self.install_task,
                    ctx,
                    "install_addon",
                    || ProgressTask::spawn(async move { addon.async_install_addon_waiting().await }),
                    "configure_addon",
                    "install_failed",
                )
                .await
            }
            "install_failed" => Err(FlowError::abort_with(
                "addon_install_failed",
                Self::addon_placeholders(&*self.addon),
            )),
            "configure_addon" => self.step_configure_addon(user_input).await,
            "start_addon" => {
                let addon = self.addon.clone();
                Self::drive_addon_task(
                    &mut self.start_task,
                    ctx,
                    "start_addon",
                    || ProgressTask::spawn(async move { addon.async_start_addon_waiting().await }),
                    "finish_addon_setup",
                    "start_failed",
                )
                .await
            }
            "start_failed" => Err(FlowError::abort_with(
                "addon_start_failed",
                Self::addon_placeholders(&*self.addon),
            )),
            "finish_addon_setup" => self.step_finish_addon_setup().await,
            "addon_installed_other_device" => match user_input {
                Some(_) => Ok(self.entry_result()),
                None => Ok(StepResult::form(
                    "addon_installed_other_device",
                    FormSchema::default(),
                )),
            },
            "addon_menu" => Ok(StepResult::menu(
                "addon_menu",
                vec!["change_channel".to_string(), "uninstall_addon".to_string()],
            )),
            "change_channel" => self.step_change_channel(user_input).await,
            "notify_channel_change" => match user_input {
                Some(_) => Ok(self.entry_result()),
                None => Ok(StepResult::form("notify_channel_change", FormSchema::default())),
            },
            "uninstall_addon" => self.step_uninstall_addon(user_input).await,
            "install_flasher_addon" => {
                let flasher = self.flasher.clone();
                Self::drive_addon_task(
                    &mut self.flasher_install_task,
                    ctx,
                    "install_flasher_addon",
                    || {
                        ProgressTask::spawn(
                            async move { flasher.async_install_addon_waiting().await },
                        )
                    },
                    "configure_flasher_addon",
                    "flasher_failed",
                )
                .await
            }
            "configure_flasher_addon" => self.step_configure_flasher_addon().await,
            "uninstall_multiprotocol_addon" => {
                let addon = self.addon.clone();
                Self::drive_addon_task(
                    &mut self.uninstall_task,
                    ctx,
                    "uninstall_multiprotocol_addon",
                    || {
                        ProgressTask::spawn(async move {
                            addon.async_uninstall_addon_waiting().await
                        })
                    },
                    "start_flasher_addon",
                    "flasher_failed",
                )
                .await
            }
            "start_flasher_addon" => {
                let flasher = self.flasher.clone();
                Self::drive_addon_task(
                    &mut self.flasher_start_task,
                    ctx,
                    "start_flasher_addon",
                    || ProgressTask::spawn(async move { flasher.async_start_addon_waiting().await }),
                    "flashing_complete",
                    "flasher_failed",
                )
                .await
            }
            "flasher_failed" => Err(FlowError::abort_with(
                "flasher_failed",
                Self::addon_placeholders(&*self.flasher),
            )),
            "flashing_complete" => Ok(self.entry_result()),
            other => Err(FlowError::UnknownStep {
                handler: "multiprotocol".to_string(),
                step_id: other.to_string(),
            }),
        }
    }
}
