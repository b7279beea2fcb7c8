//! Zigbee config flow.
//!
//! Port pick, driver probe with manual fallback, then a formation strategy
//! menu: form a new network, keep what is on the radio, restore a backup
//! from the list or upload one by hand.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use homelink_core::{ConfigEntryStore, PortConfig, UsbServiceInfo};
use homelink_flow::{
    FlowError, FlowHandler, FormField, FormSchema, Result, StepContext, StepResult,
};

use crate::backup::NetworkBackup;
use crate::radio::RadioType;
use crate::radio_manager::RadioManager;
use crate::DOMAIN;

/// Sentinel port option for typing the path by hand.
pub const MANUAL_PORT: &str = "Enter Manually";

const STEPS: &[&str] = &[
    "choose_serial_port",
    "manual_pick_radio_type",
    "manual_port_config",
    "confirm_usb",
    "choose_formation_strategy",
    "form_new_network",
    "reuse_settings",
    "restore_backup",
    "upload_manual_backup",
];

/// One serial port offered in the picker.
#[derive(Debug, Clone)]
pub struct PortOption {
    pub path: String,
    pub name: String,
}

/// The Zigbee onboarding wizard.
pub struct ZigbeeFlowHandler {
    store: Arc<ConfigEntryStore>,
    radio_manager: RadioManager,
    ports: Vec<PortOption>,
    usb_info: Option<UsbServiceInfo>,
}

impl ZigbeeFlowHandler {
    /// A user-initiated flow over the given port candidates.
    pub fn new(
        store: Arc<ConfigEntryStore>,
        radio_manager: RadioManager,
        ports: Vec<PortOption>,
    ) -> Self {
        Self {
            store,
            radio_manager,
            ports,
            usb_info: None,
        }
    }

    /// A flow initiated by a USB discovery; starts at the confirm step.
    pub fn from_usb(
        store: Arc<ConfigEntryStore>,
        radio_manager: RadioManager,
        usb_info: UsbServiceInfo,
    ) -> Self {
        Self {
            store,
            radio_manager,
            ports: Vec::new(),
            usb_info: Some(usb_info),
        }
    }

    async fn abort_if_configured(&self) -> Result<()> {
        if !self.store.async_entries(DOMAIN).await.is_empty() {
            return Err(FlowError::abort("single_instance_allowed"));
        }
        Ok(())
    }

    fn port_schema(&self) -> FormSchema {
        let mut options: Vec<String> = self.ports.iter().map(|p| p.path.clone()).collect();
        options.push(MANUAL_PORT.to_string());
        FormSchema::new(vec![FormField::select("path", options).required()])
    }

    fn radio_type_schema() -> FormSchema {
        let options = RadioType::ALL.iter().map(|t| t.as_str().to_string()).collect();
        FormSchema::new(vec![FormField::select("radio_type", options).required()])
    }

    fn manual_port_schema() -> FormSchema {
        FormSchema::new(vec![
            FormField::text("path").required(),
            FormField::integer("baudrate").with_default(json!(115_200)),
            FormField::select(
                "flow_control",
                vec!["hardware".to_string(), "software".to_string()],
            ),
        ])
    }

    /// Read the network state off the probed radio and offer the strategy
    /// menu that matches what was found.
    async fn load_settings_and_show_menu(&mut self) -> std::result::Result<StepResult, String> {
        if let Err(err) = self.radio_manager.async_load_network_settings(false).await {
            debug!(error = %err, "reading network settings failed");
            return Err("cannot_connect".to_string());
        }
        Ok(self.strategy_menu())
    }

    fn strategy_menu(&self) -> StepResult {
        let mut options = vec!["form_new_network".to_string()];
        if self.radio_manager.current_settings.is_some() {
            options.push("reuse_settings".to_string());
        }
        if !self.radio_manager.backups.is_empty() {
            options.push("restore_backup".to_string());
        }
        options.push("upload_manual_backup".to_string());
        StepResult::menu("choose_formation_strategy", options)
    }

    fn backup_schema(&self) -> FormSchema {
        let options = self
            .radio_manager
            .backups
            .iter()
            .map(|b| b.backup_time.to_rfc3339())
            .collect();
        FormSchema::new(vec![FormField::select("backup", options).required()])
    }

    fn create_entry_result(&self) -> Result<StepResult> {
        let radio_type = self
            .radio_manager
            .radio_type
            .ok_or_else(|| FlowError::Internal("no radio type picked".to_string()))?;
        let port = self
            .radio_manager
            .device_settings
            .clone()
            .ok_or_else(|| FlowError::Internal("no serial port picked".to_string()))?;
        let device = serde_json::to_value(&port)
            .map_err(|e| FlowError::Internal(format!("port not serializable: {e}")))?;

        let title = match &self.usb_info {
            Some(usb) => usb.description.clone().unwrap_or_else(|| port.path.clone()),
            None => port.path.clone(),
        };
        Ok(StepResult::create_entry(
            title,
            json!({"radio_type": radio_type.as_str(), "device": device}),
        ))
    }

    async fn step_choose_serial_port(&mut self, input: Option<Value>) -> Result<StepResult> {
        self.abort_if_configured().await?;
        let Some(input) = input else {
            return Ok(StepResult::form("choose_serial_port", self.port_schema()));
        };

        let path = input["path"].as_str().unwrap_or_default().to_string();
        if path == MANUAL_PORT {
            return Ok(StepResult::form(
                "manual_pick_radio_type",
                Self::radio_type_schema(),
            ));
        }

        self.radio_manager.device_settings = Some(PortConfig::new(&path));
        match self.radio_manager.detect_radio_type().await {
            Ok(true) => match self.load_settings_and_show_menu().await {
                Ok(menu) => Ok(menu),
                Err(error) => Ok(StepResult::form_with_errors(
                    "choose_serial_port",
                    self.port_schema(),
                    [("base".to_string(), error)].into_iter().collect(),
                )),
            },
            Ok(false) => Ok(StepResult::form(
                "manual_pick_radio_type",
                Self::radio_type_schema(),
            )),
            Err(err) => {
                debug!(error = %err, "radio detection failed");
                Ok(StepResult::form_with_errors(
                    "choose_serial_port",
                    self.port_schema(),
                    [("base".to_string(), "cannot_connect".to_string())]
                        .into_iter()
                        .collect(),
                ))
            }
        }
    }

    async fn step_manual_pick_radio_type(&mut self, input: Option<Value>) -> Result<StepResult> {
        let Some(input) = input else {
            return Ok(StepResult::form(
                "manual_pick_radio_type",
                Self::radio_type_schema(),
            ));
        };
        let radio_type = input["radio_type"]
            .as_str()
            .and_then(RadioType::from_name)
            .ok_or_else(|| FlowError::Internal("unvalidated radio type".to_string()))?;
        self.radio_manager.radio_type = Some(radio_type);
        Ok(StepResult::form(
            "manual_port_config",
            Self::manual_port_schema(),
        ))
    }

    async fn step_manual_port_config(&mut self, input: Option<Value>) -> Result<StepResult> {
        let Some(input) = input else {
            return Ok(StepResult::form(
                "manual_port_config",
                Self::manual_port_schema(),
            ));
        };
        let port: PortConfig = serde_json::from_value(input)
            .map_err(|e| FlowError::Internal(format!("unvalidated port input: {e}")))?;
        self.radio_manager.device_settings = Some(port);

        match self.load_settings_and_show_menu().await {
            Ok(menu) => Ok(menu),
            Err(error) => Ok(StepResult::form_with_errors(
                "manual_port_config",
                Self::manual_port_schema(),
                [("base".to_string(), error)].into_iter().collect(),
            )),
        }
    }

    async fn step_confirm_usb(&mut self, input: Option<Value>) -> Result<StepResult> {
        self.abort_if_configured().await?;
        let usb = self
            .usb_info
            .clone()
            .ok_or_else(|| FlowError::Internal("confirm step without USB info".to_string()))?;

        if input.is_none() {
            return Ok(StepResult::form("confirm_usb", FormSchema::default()));
        }

        self.radio_manager.device_settings = Some(PortConfig::new(&usb.device));
        match self.radio_manager.detect_radio_type().await {
            Ok(true) => self
                .load_settings_and_show_menu()
                .await
                .map_err(|_| FlowError::abort("usb_probe_failed")),
            Ok(false) | Err(_) => Err(FlowError::abort("usb_probe_failed")),
        }
    }

    async fn step_restore_backup(&mut self, input: Option<Value>) -> Result<StepResult> {
        let Some(input) = input else {
            return Ok(StepResult::form("restore_backup", self.backup_schema()));
        };
        let chosen = input["backup"].as_str().unwrap_or_default();
        let backup = self
            .radio_manager
            .backups
            .iter()
            .find(|b| b.backup_time.to_rfc3339() == chosen)
            .cloned()
            .ok_or_else(|| FlowError::Internal("unvalidated backup choice".to_string()))?;

        self.restore_and_finish(backup).await
    }

    async fn step_upload_manual_backup(&mut self, input: Option<Value>) -> Result<StepResult> {
        let schema = FormSchema::new(vec![FormField::text("backup_json").required()]);
        let Some(input) = input else {
            return Ok(StepResult::form("upload_manual_backup", schema));
        };

        let raw = input["backup_json"].as_str().unwrap_or_default();
        let backup: NetworkBackup = match serde_json::from_str(raw) {
            Ok(backup) => backup,
            Err(err) => {
                debug!(error = %err, "uploaded backup does not parse");
                return Ok(StepResult::form_with_errors(
                    "upload_manual_backup",
                    schema,
                    [("backup_json".to_string(), "invalid_backup_json".to_string())]
                        .into_iter()
                        .collect(),
                ));
            }
        };
        self.restore_and_finish(backup).await
    }

    async fn restore_and_finish(&mut self, backup: NetworkBackup) -> Result<StepResult> {
        self.radio_manager.chosen_backup = Some(backup.clone());
        self.radio_manager
            .async_restore_backup(&backup, false)
            .await
            .map_err(|err| {
                FlowError::abort_with(
                    "cannot_restore_backup",
                    [("error".to_string(), err.to_string())],
                )
            })?;
        self.create_entry_result()
    }
}

#[async_trait]
impl FlowHandler for ZigbeeFlowHandler {
    fn domain(&self) -> &str {
        DOMAIN
    }

    fn step_ids(&self) -> &'static [&'static str] {
        STEPS
    }

    fn initial_step(&self) -> &'static str {
        if self.usb_info.is_some() {
            "confirm_usb"
        } else {
            "choose_serial_port"
        }
    }

    async fn handle_step(
        &mut self,
        step_id: &str,
        user_input: Option<Value>,
        _ctx: &mut StepContext,
    ) -> Result<StepResult> {
        match step_id {
            "choose_serial_port" => self.step_choose_serial_port(user_input).await,
            "manual_pick_radio_type" => self.step_manual_pick_radio_type(user_input).await,
            "manual_port_config" => self.step_manual_port_config(user_input).await,
            "confirm_usb" => self.step_confirm_usb(user_input).await,
            "choose_formation_strategy" => Ok(self.strategy_menu()),
            "form_new_network" => {
                self.radio_manager.async_form_network().await.map_err(|err| {
                    FlowError::abort_with(
                        "cannot_connect",
                        [("error".to_string(), err.to_string())],
                    )
                })?;
                self.create_entry_result()
            }
            "reuse_settings" => self.create_entry_result(),
            "restore_backup" => self.step_restore_backup(user_input).await,
            "upload_manual_backup" => self.step_upload_manual_backup(user_input).await,
            other => Err(FlowError::UnknownStep {
                handler: DOMAIN.to_string(),
                step_id: other.to_string(),
            }),
        }
    }
}
