// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies
//
// hwpool Scan Lifecycle Tests
//
// TESTING LAYERS:
//
// Layer 1 (Unit Tests - No hardware required):
//   - test_refresh_is_idempotent: two scans with no change, same pool index
//   - test_multi_function_card_shares_module_id: one unit, several classes
//   - test_replug_keeps_module_id: unplug, rescan, replug at a new handle
//   - test_new_unit_never_reuses_id: ids stay monotonic after removals
//   - test_duplicate_identity_skipped: second handle with the same identity
//   - test_transport_fault_skipped: unreadable device does not abort scan
//   - test_oversized_handle_skipped: handle longer than a record can hold
//   - test_firmware_gating: unsupported firmware kept out of the pool
//   - test_dropped_function_retired: a unit stops exposing one class
//   - test_add_and_remove_device: single-device admission and removal
//   - test_corrupt_pool_index_rebuilt: damaged pool.json recovered
//   - test_corrupt_record_id_not_reused: discarded record keeps its id taken
//   - test_release_after_retire: outstanding claims survive hot-remove
//
// All tests run against a simulated inventory in a temporary region root.
//
// RUN:
//   cargo test -p hwpool --test scan_lifecycle

use std::fs;
use std::sync::Arc;

use hwpool::hardware::{Inventory, InventoryDevice};
use hwpool::{
    AllocationRule, Codec, CodecCapability, Compatibility, Config, DeviceClass, Error,
    ResourceManager, DEVICE_NAME_LEN,
};
use tempfile::TempDir;

fn card(n: u32, firmware: &str, classes: &[DeviceClass]) -> InventoryDevice {
    let mut device = InventoryDevice::new(
        &format!("/dev/nvme{}n1", n),
        &format!("Q1A2300{:05}", n),
        "T2A",
        firmware,
    );
    for class in classes {
        device = device.with_function(
            *class,
            16,
            vec![
                CodecCapability::new(Codec::H264, (144, 144), (4096, 2176)),
                CodecCapability::new(Codec::H265, (144, 144), (8192, 4352)),
            ],
        );
    }
    device
}

fn codec_card(n: u32) -> InventoryDevice {
    card(n, "6r3", &[DeviceClass::Decoder, DeviceClass::Encoder])
}

fn open(dir: &TempDir, inventory: &Arc<Inventory>) -> ResourceManager {
    let _ = env_logger::builder().is_test(true).try_init();
    let config = Config::default().with_root(dir.path());
    ResourceManager::open(config, inventory.clone()).unwrap()
}

fn live_ids(manager: &ResourceManager, class: DeviceClass) -> Vec<u32> {
    manager
        .list_devices(class)
        .unwrap()
        .map(|record| record.unwrap().module_id)
        .collect()
}

#[test]
fn test_refresh_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let inventory = Arc::new(Inventory::from_devices(vec![codec_card(0), codec_card(1)]));
    let manager = open(&dir, &inventory);

    let first = manager.refresh(true).unwrap();
    assert_eq!(first.known, 2);
    assert_eq!(first.added, 4);
    let pool = manager.device_pool().unwrap();

    let second = manager.refresh(true).unwrap();
    assert_eq!(second.known, 2);
    assert_eq!(second.added, 0);
    assert_eq!(second.updated, 4);
    assert_eq!(second.retired, 0);
    assert_eq!(manager.device_pool().unwrap(), pool);
    assert_eq!(live_ids(&manager, DeviceClass::Encoder), vec![0, 1]);
}

#[test]
fn test_multi_function_card_shares_module_id() {
    let dir = TempDir::new().unwrap();
    let inventory = Arc::new(Inventory::from_devices(vec![
        card(0, "6r3", &[DeviceClass::Decoder]),
        card(1, "6r3", &[DeviceClass::Decoder, DeviceClass::Encoder, DeviceClass::Scaler]),
    ]));
    let manager = open(&dir, &inventory);
    manager.refresh(true).unwrap();

    let pool = manager.device_pool().unwrap();
    assert_eq!(pool.ids(DeviceClass::Decoder), &[0, 1]);
    assert_eq!(pool.ids(DeviceClass::Encoder), &[1]);
    assert_eq!(pool.ids(DeviceClass::Scaler), &[1]);
    assert_eq!(pool.ids(DeviceClass::Ai), &[] as &[u32]);

    let encoder = manager.device_info(DeviceClass::Encoder, 1).unwrap();
    let scaler = manager.device_info(DeviceClass::Scaler, 1).unwrap();
    assert_eq!(encoder.serial_number, scaler.serial_number);
    assert_eq!(encoder.dev_name, "/dev/nvme1n1");
}

#[test]
fn test_replug_keeps_module_id() {
    let dir = TempDir::new().unwrap();
    let inventory = Arc::new(Inventory::from_devices(vec![codec_card(0), codec_card(1)]));
    let manager = open(&dir, &inventory);
    manager.refresh(true).unwrap();

    let mut moved = codec_card(1);
    assert!(inventory.unplug(&moved.handle));
    let report = manager.refresh(true).unwrap();
    assert_eq!(report.known, 1);
    assert_eq!(report.retired, 2);
    assert_eq!(live_ids(&manager, DeviceClass::Decoder), vec![0]);
    assert!(matches!(
        manager.device_info(DeviceClass::Decoder, 1),
        Err(Error::NotFound { .. })
    ));

    // Retired records stay visible for inspection.
    let all = manager.list_all_devices(true).unwrap();
    assert!(all.iter().any(|r| r.module_id == 1 && r.retired));

    // Same unit comes back on another slot.
    moved.handle = "/dev/nvme7n1".to_string();
    inventory.plug(moved);
    let report = manager.refresh(true).unwrap();
    assert_eq!(report.known, 2);
    assert_eq!(report.added, 0);

    let record = manager.device_info(DeviceClass::Decoder, 1).unwrap();
    assert_eq!(record.dev_name, "/dev/nvme7n1");
    assert_eq!(live_ids(&manager, DeviceClass::Decoder), vec![0, 1]);

    let serial = &record.serial_number;
    let claiming: Vec<_> = manager
        .list_all_devices(false)
        .unwrap()
        .into_iter()
        .filter(|r| r.class == DeviceClass::Decoder && &r.serial_number == serial)
        .collect();
    assert_eq!(claiming.len(), 1);
}

#[test]
fn test_new_unit_never_reuses_id() {
    let dir = TempDir::new().unwrap();
    let inventory = Arc::new(Inventory::from_devices(vec![codec_card(0), codec_card(1)]));
    let manager = open(&dir, &inventory);
    manager.refresh(true).unwrap();

    inventory.unplug("/dev/nvme1n1");
    manager.refresh(true).unwrap();
    inventory.plug(codec_card(2));
    manager.refresh(true).unwrap();

    assert_eq!(live_ids(&manager, DeviceClass::Encoder), vec![0, 2]);
    assert_eq!(manager.device_pool().unwrap().next_module_id(), 3);
}

#[test]
fn test_duplicate_identity_skipped() {
    let dir = TempDir::new().unwrap();
    let mut twin = codec_card(0);
    twin.handle = "/dev/nvme9n1".to_string();
    let inventory = Arc::new(Inventory::from_devices(vec![codec_card(0), twin, codec_card(1)]));
    let manager = open(&dir, &inventory);

    let report = manager.refresh(true).unwrap();
    assert_eq!(report.known, 2);
    assert_eq!(report.duplicates, vec!["/dev/nvme9n1".to_string()]);
    assert_eq!(
        manager.device_info(DeviceClass::Decoder, 0).unwrap().dev_name,
        "/dev/nvme0n1"
    );
    assert_eq!(live_ids(&manager, DeviceClass::Decoder), vec![0, 1]);
}

#[test]
fn test_transport_fault_skipped() {
    let dir = TempDir::new().unwrap();
    let inventory = Arc::new(Inventory::from_devices(vec![codec_card(0), codec_card(1)]));
    inventory.set_fault("/dev/nvme0n1", Some("identify timed out"));
    let manager = open(&dir, &inventory);

    let report = manager.refresh(true).unwrap();
    assert_eq!(report.known, 1);
    assert_eq!(report.transport_errors, vec!["/dev/nvme0n1".to_string()]);
    assert_eq!(report.skipped(), 1);
    assert_eq!(live_ids(&manager, DeviceClass::Decoder), vec![0]);
    assert_eq!(
        manager.device_info(DeviceClass::Decoder, 0).unwrap().dev_name,
        "/dev/nvme1n1"
    );

    inventory.set_fault("/dev/nvme0n1", None);
    let report = manager.refresh(true).unwrap();
    assert_eq!(report.known, 2);
    assert!(report.transport_errors.is_empty());
}

#[test]
fn test_oversized_handle_skipped() {
    let dir = TempDir::new().unwrap();
    let handle = format!("/dev/disk/by-id/{}", "x".repeat(DEVICE_NAME_LEN));
    let long = InventoryDevice::new(&handle, "Q1A230000099", "T2A", "6r3")
        .with_function(DeviceClass::Decoder, 16, Vec::new());
    let inventory = Arc::new(Inventory::from_devices(vec![codec_card(0), long]));
    let manager = open(&dir, &inventory);

    let report = manager.refresh(true).unwrap();
    assert_eq!(report.known, 1);
    assert_eq!(report.transport_errors, vec![handle]);
    assert_eq!(live_ids(&manager, DeviceClass::Decoder), vec![0]);
}

#[test]
fn test_firmware_gating() {
    let dir = TempDir::new().unwrap();
    let inventory = Arc::new(Inventory::from_devices(vec![
        card(0, "5r9", &[DeviceClass::Encoder]),
        card(1, "6q1", &[DeviceClass::Encoder]),
    ]));
    let manager = open(&dir, &inventory);

    let report = manager.refresh(true).unwrap();
    assert_eq!(report.incompatible, vec!["/dev/nvme0n1".to_string()]);
    assert_eq!(live_ids(&manager, DeviceClass::Encoder), vec![1]);

    let all = manager.list_all_devices(true).unwrap();
    let gated = all.iter().find(|r| r.module_id == 0).unwrap();
    assert_eq!(gated.compatibility, Compatibility::None);
    assert!(!gated.retired);
    assert!(manager
        .list_all_devices(false)
        .unwrap()
        .iter()
        .all(|r| r.module_id != 0));
    assert_eq!(
        manager.device_info(DeviceClass::Encoder, 1).unwrap().compatibility,
        Compatibility::Partial
    );

    // Only the partially compatible unit is ever chosen.
    let mut allocs = Vec::new();
    for _ in 0..3 {
        allocs.push(
            manager
                .allocate_auto(
                    DeviceClass::Encoder,
                    AllocationRule::LeastLoad,
                    Codec::H264,
                    1280,
                    720,
                    30,
                )
                .unwrap(),
        );
    }
    assert!(allocs.iter().all(|a| a.context.module_id() == 1));
    for mut alloc in allocs {
        manager.release_resource(&mut alloc.context, alloc.load).unwrap();
    }

    // Without the requirement the unit joins the pool.
    manager.refresh(false).unwrap();
    assert_eq!(live_ids(&manager, DeviceClass::Encoder), vec![0, 1]);
}

#[test]
fn test_dropped_function_retired() {
    let dir = TempDir::new().unwrap();
    let inventory = Arc::new(Inventory::from_devices(vec![codec_card(0)]));
    let manager = open(&dir, &inventory);
    manager.refresh(true).unwrap();

    inventory.plug(card(0, "6r3", &[DeviceClass::Decoder]));
    let report = manager.refresh(true).unwrap();
    assert_eq!(report.retired, 1);
    assert_eq!(live_ids(&manager, DeviceClass::Decoder), vec![0]);
    assert!(live_ids(&manager, DeviceClass::Encoder).is_empty());

    inventory.plug(codec_card(0));
    manager.refresh(true).unwrap();
    assert_eq!(live_ids(&manager, DeviceClass::Encoder), vec![0]);
}

#[test]
fn test_add_and_remove_device() {
    let dir = TempDir::new().unwrap();
    let inventory = Arc::new(Inventory::from_devices(vec![codec_card(0)]));
    let manager = open(&dir, &inventory);
    manager.refresh(true).unwrap();

    inventory.plug(codec_card(1));
    let report = manager.add_device("/dev/nvme1n1", true).unwrap();
    assert_eq!(report.added, 2);
    assert_eq!(report.known, 2);
    assert_eq!(live_ids(&manager, DeviceClass::Encoder), vec![0, 1]);

    // Admitting the same unit at a second handle is a duplicate.
    let mut twin = codec_card(1);
    twin.handle = "/dev/nvme5n1".to_string();
    inventory.plug(twin);
    assert!(matches!(
        manager.add_device("/dev/nvme5n1", true),
        Err(Error::DuplicateDevice { .. })
    ));

    assert_eq!(manager.remove_device("/dev/nvme1n1").unwrap(), 2);
    assert_eq!(live_ids(&manager, DeviceClass::Encoder), vec![0]);
    assert!(matches!(
        manager.remove_device("/dev/nvme1n1"),
        Err(Error::UnknownHandle(_))
    ));
}

#[test]
fn test_corrupt_pool_index_rebuilt() {
    let dir = TempDir::new().unwrap();
    let inventory = Arc::new(Inventory::from_devices(vec![codec_card(0), codec_card(1)]));
    let manager = open(&dir, &inventory);
    manager.refresh(true).unwrap();
    let pool = manager.device_pool().unwrap();

    fs::write(dir.path().join("pool.json"), b"{\"queues\": [").unwrap();
    assert!(manager.device_pool().is_err());

    let report = manager.refresh(true).unwrap();
    assert_eq!(report.known, 2);
    assert_eq!(report.added, 0);
    let rebuilt = manager.device_pool().unwrap();
    assert_eq!(rebuilt.ids(DeviceClass::Encoder), pool.ids(DeviceClass::Encoder));
    assert_eq!(rebuilt.next_module_id(), 2);
}

#[test]
fn test_corrupt_record_id_not_reused() {
    let dir = TempDir::new().unwrap();
    let encoders = [DeviceClass::Encoder];
    let inventory = Arc::new(Inventory::from_devices(vec![
        card(0, "6r3", &encoders),
        card(1, "6r3", &encoders),
    ]));
    let manager = open(&dir, &inventory);
    manager.refresh(true).unwrap();

    let corrupt = dir.path().join("devices").join("encoder-1.json");
    fs::write(corrupt, b"{\"module_id\":").unwrap();
    fs::write(dir.path().join("pool.json"), b"garbage").unwrap();
    inventory.unplug("/dev/nvme1n1");
    inventory.plug(card(2, "6r3", &encoders));
    manager.refresh(true).unwrap();

    let pool = manager.device_pool().unwrap();
    let newcomer = pool.identity("Q1A230000002", "T2A").unwrap();
    assert_eq!(newcomer.module_id, 2);
    assert_eq!(live_ids(&manager, DeviceClass::Encoder), vec![0, 2]);
}

#[test]
fn test_release_after_retire() {
    let dir = TempDir::new().unwrap();
    let inventory = Arc::new(Inventory::from_devices(vec![codec_card(0)]));
    let manager = open(&dir, &inventory);
    manager.refresh(true).unwrap();

    let mut alloc = manager
        .allocate_direct(DeviceClass::Encoder, 0, Codec::H265, 3840, 2160, 30)
        .unwrap();
    inventory.unplug("/dev/nvme0n1");
    manager.refresh(true).unwrap();

    manager.release_resource(&mut alloc.context, alloc.load).unwrap();
    let record = manager
        .list_all_devices(true)
        .unwrap()
        .into_iter()
        .find(|r| r.class == DeviceClass::Encoder)
        .unwrap();
    assert!(record.retired);
    assert_eq!(record.model_load, 0);
    assert!(record.sw_instances.is_empty());
}
