//! The Zigbee config flow end to end, driven through the flow manager.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde_json::json;

use common::{sample_backup, MockController, MockRadio};
use homelink_core::{ConfigEntry, ConfigEntryStore};
use homelink_flow::{FlowContext, FlowManager, StepResult};
use homelink_zigbee::{PortOption, RadioManager, RadioType, ZigbeeFlowHandler};

fn ports() -> Vec<PortOption> {
    vec![PortOption {
        path: "/dev/ttyUSB0".to_string(),
        name: "CC2652 stick".to_string(),
    }]
}

fn handler(store: &Arc<ConfigEntryStore>, radio: &Arc<MockRadio>) -> Box<ZigbeeFlowHandler> {
    Box::new(ZigbeeFlowHandler::new(
        store.clone(),
        RadioManager::new(Arc::new(MockController(radio.clone()))),
        ports(),
    ))
}

#[tokio::test(start_paused = true)]
async fn test_second_instance_aborts() {
    let store = ConfigEntryStore::new();
    store
        .async_add(ConfigEntry::new("zigbee", "Existing", json!({})))
        .await
        .unwrap();
    let radio = MockRadio::answering(RadioType::Znp);
    let manager = FlowManager::new();

    let (_, result) = manager
        .async_init(handler(&store, &radio), FlowContext::with_source("user"))
        .await
        .unwrap();
    let StepResult::Abort { reason, .. } = result else {
        panic!("expected abort, got {result:?}");
    };
    assert_eq!(reason, "single_instance_allowed");
}

#[tokio::test(start_paused = true)]
async fn test_probe_form_new_network_creates_entry() {
    let store = ConfigEntryStore::new();
    let radio = MockRadio::answering(RadioType::Znp);
    let manager = FlowManager::new();

    let (flow_id, result) = manager
        .async_init(handler(&store, &radio), FlowContext::with_source("user"))
        .await
        .unwrap();
    let StepResult::Form { step_id, .. } = &result else {
        panic!("expected port picker, got {result:?}");
    };
    assert_eq!(step_id, "choose_serial_port");

    let result = manager
        .async_configure(&flow_id, Some(json!({"path": "/dev/ttyUSB0"})))
        .await
        .unwrap();
    let StepResult::Menu { menu_options, .. } = &result else {
        panic!("expected strategy menu, got {result:?}");
    };
    // Blank radio: nothing to reuse and no backups to restore.
    assert_eq!(menu_options, &["form_new_network", "upload_manual_backup"]);

    let result = manager
        .async_configure(&flow_id, Some(json!({"next_step_id": "form_new_network"})))
        .await
        .unwrap();
    let StepResult::CreateEntry { title, data, .. } = result else {
        panic!("expected entry, got {result:?}");
    };
    assert_eq!(title, "/dev/ttyUSB0");
    assert_eq!(data["radio_type"], "znp");
    assert_eq!(data["device"]["path"], "/dev/ttyUSB0");
    assert_eq!(radio.forms.load(Ordering::SeqCst), 1);

    // Terminal result removed the flow.
    assert!(manager.async_progress().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_probe_falls_back_to_manual_selection() {
    let store = ConfigEntryStore::new();
    let radio = MockRadio::deaf();
    let manager = FlowManager::new();

    let (flow_id, _) = manager
        .async_init(handler(&store, &radio), FlowContext::with_source("user"))
        .await
        .unwrap();

    let result = manager
        .async_configure(&flow_id, Some(json!({"path": "/dev/ttyUSB0"})))
        .await
        .unwrap();
    let StepResult::Form { step_id, .. } = &result else {
        panic!("expected manual picker, got {result:?}");
    };
    assert_eq!(step_id, "manual_pick_radio_type");

    let result = manager
        .async_configure(&flow_id, Some(json!({"radio_type": "znp"})))
        .await
        .unwrap();
    let StepResult::Form { step_id, .. } = &result else {
        panic!("expected port form, got {result:?}");
    };
    assert_eq!(step_id, "manual_port_config");

    // Connection refused: same form again with a base error, flow intact.
    radio.connect_fails.store(true, Ordering::SeqCst);
    let result = manager
        .async_configure(&flow_id, Some(json!({"path": "/dev/ttyACM1"})))
        .await
        .unwrap();
    let StepResult::Form { step_id, errors, .. } = &result else {
        panic!("expected error form, got {result:?}");
    };
    assert_eq!(step_id, "manual_port_config");
    assert_eq!(errors.get("base").map(String::as_str), Some("cannot_connect"));

    radio.connect_fails.store(false, Ordering::SeqCst);
    let result = manager
        .async_configure(&flow_id, Some(json!({"path": "/dev/ttyACM1"})))
        .await
        .unwrap();
    assert!(matches!(result, StepResult::Menu { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_restore_backup_path() {
    let store = ConfigEntryStore::new();
    let radio = MockRadio::answering(RadioType::Ezsp);
    *radio.network.lock().unwrap() = Some(sample_backup(5));
    *radio.stored_backups.lock().unwrap() = vec![sample_backup(10)];
    let manager = FlowManager::new();

    let (flow_id, _) = manager
        .async_init(handler(&store, &radio), FlowContext::with_source("user"))
        .await
        .unwrap();

    let result = manager
        .async_configure(&flow_id, Some(json!({"path": "/dev/ttyUSB0"})))
        .await
        .unwrap();
    let StepResult::Menu { menu_options, .. } = &result else {
        panic!("expected strategy menu, got {result:?}");
    };
    assert_eq!(
        menu_options,
        &[
            "form_new_network",
            "reuse_settings",
            "restore_backup",
            "upload_manual_backup"
        ]
    );

    let result = manager
        .async_configure(&flow_id, Some(json!({"next_step_id": "restore_backup"})))
        .await
        .unwrap();
    let StepResult::Form { step_id, schema, .. } = &result else {
        panic!("expected backup picker, got {result:?}");
    };
    assert_eq!(step_id, "restore_backup");
    let choice = schema.fields[0].options[0].clone();

    let result = manager
        .async_configure(&flow_id, Some(json!({"backup": choice})))
        .await
        .unwrap();
    assert!(matches!(result, StepResult::CreateEntry { .. }));
    assert_eq!(radio.restores.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reuse_settings_touches_nothing() {
    let store = ConfigEntryStore::new();
    let radio = MockRadio::answering(RadioType::Znp);
    *radio.network.lock().unwrap() = Some(sample_backup(5));
    let manager = FlowManager::new();

    let (flow_id, _) = manager
        .async_init(handler(&store, &radio), FlowContext::with_source("user"))
        .await
        .unwrap();
    manager
        .async_configure(&flow_id, Some(json!({"path": "/dev/ttyUSB0"})))
        .await
        .unwrap();

    let result = manager
        .async_configure(&flow_id, Some(json!({"next_step_id": "reuse_settings"})))
        .await
        .unwrap();
    assert!(matches!(result, StepResult::CreateEntry { .. }));
    assert_eq!(radio.forms.load(Ordering::SeqCst), 0);
    assert_eq!(radio.restores.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_manual_backup_re_renders_form() {
    let store = ConfigEntryStore::new();
    let radio = MockRadio::answering(RadioType::Znp);
    let manager = FlowManager::new();

    let (flow_id, _) = manager
        .async_init(handler(&store, &radio), FlowContext::with_source("user"))
        .await
        .unwrap();
    manager
        .async_configure(&flow_id, Some(json!({"path": "/dev/ttyUSB0"})))
        .await
        .unwrap();
    manager
        .async_configure(&flow_id, Some(json!({"next_step_id": "upload_manual_backup"})))
        .await
        .unwrap();

    let result = manager
        .async_configure(&flow_id, Some(json!({"backup_json": "not json"})))
        .await
        .unwrap();
    let StepResult::Form { errors, .. } = &result else {
        panic!("expected error form, got {result:?}");
    };
    assert_eq!(
        errors.get("backup_json").map(String::as_str),
        Some("invalid_backup_json")
    );
}

#[tokio::test(start_paused = true)]
async fn test_usb_discovery_confirm_flow() {
    let store = ConfigEntryStore::new();
    let radio = MockRadio::answering(RadioType::Znp);
    let manager = FlowManager::new();

    let usb = homelink_core::UsbServiceInfo::new("/dev/ttyUSB7", 0x10c4, 0xea60)
        .with_description("cc2652 stick");
    let unique_id = usb.unique_id();
    let flow_handler = Box::new(ZigbeeFlowHandler::from_usb(
        store.clone(),
        RadioManager::new(Arc::new(MockController(radio.clone()))),
        usb,
    ));

    let (flow_id, result) = manager
        .async_init(
            flow_handler,
            FlowContext::with_source("usb").with_unique_id(unique_id),
        )
        .await
        .unwrap();
    let StepResult::Form { step_id, .. } = &result else {
        panic!("expected confirm form, got {result:?}");
    };
    assert_eq!(step_id, "confirm_usb");

    let result = manager.async_configure(&flow_id, Some(json!({}))).await.unwrap();
    assert!(matches!(result, StepResult::Menu { .. }));

    let result = manager
        .async_configure(&flow_id, Some(json!({"next_step_id": "form_new_network"})))
        .await
        .unwrap();
    let StepResult::CreateEntry { title, data, .. } = result else {
        panic!("expected entry, got {result:?}");
    };
    assert_eq!(title, "cc2652 stick");
    assert_eq!(data["device"]["path"], "/dev/ttyUSB7");
}

#[tokio::test(start_paused = true)]
async fn test_usb_probe_failure_aborts() {
    let store = ConfigEntryStore::new();
    let radio = MockRadio::deaf();
    let manager = FlowManager::new();

    let usb = homelink_core::UsbServiceInfo::new("/dev/ttyUSB7", 0x10c4, 0xea60);
    let unique_id = usb.unique_id();
    let flow_handler = Box::new(ZigbeeFlowHandler::from_usb(
        store.clone(),
        RadioManager::new(Arc::new(MockController(radio.clone()))),
        usb,
    ));
    let (flow_id, _) = manager
        .async_init(
            flow_handler,
            FlowContext::with_source("usb").with_unique_id(unique_id),
        )
        .await
        .unwrap();

    let result = manager.async_configure(&flow_id, Some(json!({}))).await.unwrap();
    let StepResult::Abort { reason, .. } = result else {
        panic!("expected abort, got {result:?}");
    };
    assert_eq!(reason, "usb_probe_failed");
}
