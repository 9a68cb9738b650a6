/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
mod common;

use std::sync::atomic::Ordering;

use common::*;
use mtkflash::da::DAType;
use mtkflash::{Device, DeviceBuilder, Error, Section, Stage, StorageRegion};

const BS: usize = BLOCK_SIZE as usize;
const CAPACITY: u64 = 4096;
const PARTS: &[(&str, u64, u64)] = &[("boot", 64, 256), ("system", 320, 2048), ("userdata", 2368, 1728)];

async fn connected(config: SimConfig) -> (Device, SimHandle) {
    init_logger();
    let (port, sim) = spawn_device(config);
    let mut device = DeviceBuilder::default()
        .with_mtk_port(Box::new(port))
        .with_images(images(test_da(DAType::V5, 0x1234, 3)))
        .with_dialects(dialects(0x1234, DAType::V5))
        .build()
        .unwrap();
    device.connect().await.unwrap();
    (device, sim)
}

fn config() -> SimConfig {
    SimConfig::new(0x1234, SimDa::XFlash, gpt_disk(CAPACITY, PARTS))
}

#[tokio::test]
async fn write_then_read_back() {
    let (mut device, sim) = connected(config()).await;
    let data = pattern(3000, 7);

    let mut last = (0, 0);
    let mut progress = |done: usize, total: usize| last = (done, total);
    let report = device.write_partition("boot", &data, &mut progress).await.unwrap();
    assert_eq!(report.bytes_written, 3072);
    assert_eq!(report.padding, 72);
    assert_eq!(last, (3072, 3072));

    let read = device
        .read_region(&StorageRegion::partition("boot"), Some(data.len()), &mut no_progress())
        .await
        .unwrap();
    assert_eq!(read, data);

    let start = 64 * BS;
    let state = sim.state();
    assert_eq!(&state.user()[start..start + 3000], &data[..]);
    assert!(state.user()[start + 3000..start + 3072].iter().all(|&b| b == 0));
}

#[tokio::test]
async fn whole_partition_read_has_partition_size() {
    let (mut device, _sim) = connected(config()).await;
    let data = device.read_partition("boot", &mut no_progress()).await.unwrap();
    assert_eq!(data.len(), 256 * BS);
}

#[tokio::test]
async fn raw_boot_section_round_trip() {
    let (mut device, sim) = connected(config()).await;
    let region = StorageRegion::Raw { section: Section::Boot1, start_lba: 2, blocks: 4 };
    let data = pattern(4 * BS, 3);

    device.write_region(&region, &data, &mut no_progress()).await.unwrap();
    assert_eq!(&sim.state().sections[&1][2 * BS..6 * BS], &data[..]);
    assert!(device.verify_region(&region, &data, &mut no_progress()).await.unwrap());
}

#[tokio::test]
async fn out_of_range_requests_never_reach_the_device() {
    init_logger();
    let (port, _sim) = spawn_device(config());
    let (port, calls) = CountingPort::new(port);
    let mut device = DeviceBuilder::default()
        .with_mtk_port(Box::new(port))
        .with_images(images(test_da(DAType::V5, 0x1234, 3)))
        .with_dialects(dialects(0x1234, DAType::V5))
        .build()
        .unwrap();
    device.connect().await.unwrap();
    device.list_partitions().await.unwrap();

    let before = calls.load(Ordering::SeqCst);

    let too_big = vec![0u8; 256 * BS + 1];
    let err = device.write_partition("boot", &too_big, &mut no_progress()).await.unwrap_err();
    assert!(matches!(err.root(), Error::OutOfRange(_)));

    let err = device.read_partition("nope", &mut no_progress()).await.unwrap_err();
    assert!(matches!(err.root(), Error::OutOfRange(_)));

    let beyond = StorageRegion::Raw { section: Section::User, start_lba: CAPACITY - 1, blocks: 2 };
    let err = device.erase_region(&beyond, &mut no_progress()).await.unwrap_err();
    assert!(matches!(err.root(), Error::OutOfRange(_)));

    let range = StorageRegion::PartitionRange { name: "boot".into(), offset_blocks: 200, blocks: 57 };
    let err = device.read_region(&range, None, &mut no_progress()).await.unwrap_err();
    assert!(matches!(err.root(), Error::OutOfRange(_)));

    assert_eq!(calls.load(Ordering::SeqCst), before);
    assert_eq!(device.stage(), Stage::Da);
}

#[tokio::test]
async fn rejected_chunk_reports_acknowledged_prefix() {
    let mut config = config();
    config.fail_write_chunk = Some(2);
    let (mut device, sim) = connected(config).await;

    let data = pattern(0x1000, 1);
    let err = device.write_partition("boot", &data, &mut no_progress()).await.unwrap_err();
    match err.root() {
        Error::WriteAborted { offset, cause } => {
            assert_eq!(*offset, 2 * 0x200);
            assert!(matches!(**cause, Error::Status(_)));
        }
        other => panic!("expected a write abort, got {other:?}"),
    }
    assert!(!err.is_fatal());
    assert_eq!(device.stage(), Stage::Da);

    // Acknowledged chunks are on the storage, the session keeps working
    let start = 64 * BS;
    assert_eq!(&sim.state().user()[start..start + 0x400], &data[..0x400]);
    let read = device
        .read_region(&StorageRegion::partition("boot"), Some(0x400), &mut no_progress())
        .await
        .unwrap();
    assert_eq!(read, &data[..0x400]);
}

#[tokio::test]
async fn verify_compares_contents() {
    let (mut device, _sim) = connected(config()).await;
    let data = pattern(2 * BS, 9);
    device.write_partition("system", &data, &mut no_progress()).await.unwrap();

    assert!(device.verify_partition("system", &data, &mut no_progress()).await.unwrap());

    let mut other = data.clone();
    other[700] ^= 0x01;
    assert!(!device.verify_partition("system", &other, &mut no_progress()).await.unwrap());
}

#[tokio::test]
async fn corrupt_chunk_is_retransmitted_once() {
    let mut config = config();
    let offset = (64 * BS + 0x1800) as u64;
    config.corrupt_read = Some((offset, 1));
    let (mut device, sim) = connected(config).await;

    let data = device.read_partition("boot", &mut no_progress()).await.unwrap();
    assert_eq!(data.len(), 256 * BS);
    assert_eq!(sim.state().resent_chunks, 1);
}

#[tokio::test]
async fn chunk_corrupt_twice_fails_with_its_offset() {
    let mut config = config();
    // Third chunk of a read starting at the boot partition
    let chunk_start = (64 * BS + 0x2000) as u64;
    config.corrupt_read = Some((chunk_start + 5, 2));
    let (mut device, _sim) = connected(config).await;
    device.list_partitions().await.unwrap();

    let err = device.read_partition("boot", &mut no_progress()).await.unwrap_err();
    assert!(matches!(err.root(), Error::ReadIntegrity { offset } if *offset == chunk_start));
    assert!(!err.is_fatal());

    // The DA left the read, later commands still work
    let read = device
        .read_region(&StorageRegion::partition("system"), Some(BS), &mut no_progress())
        .await
        .unwrap();
    assert_eq!(read.len(), BS);
}

#[tokio::test]
async fn cancelled_write_stops_between_chunks() {
    let (mut device, _sim) = connected(config()).await;
    let token = device.cancel_token();
    let data = pattern(0x1000, 5);

    let mut progress = move |done: usize, _total: usize| {
        if done >= 0x200 {
            token.cancel();
        }
    };
    let err = device.write_partition("boot", &data, &mut progress).await.unwrap_err();
    match err.root() {
        Error::WriteAborted { offset, cause } => {
            assert_eq!(*offset, 0x200);
            assert!(matches!(**cause, Error::Cancelled));
        }
        other => panic!("expected a write abort, got {other:?}"),
    }
    assert!(!device.cancel_token().is_cancelled());

    // The DA still waits for the rest of the data, so the session is gone
    assert_eq!(device.stage(), Stage::Disconnected);
    let err = device.read_partition("boot", &mut no_progress()).await.unwrap_err();
    assert!(matches!(err.root(), Error::StateMismatch { expected: Stage::Da, .. }));
}

fn cancel_after(device: &Device, bytes: usize) -> impl FnMut(usize, usize) + Send + use<> {
    let token = device.cancel_token();
    move |done: usize, _total: usize| {
        if done >= bytes {
            token.cancel();
        }
    }
}

#[tokio::test]
async fn reconnecting_after_a_cancelled_write_restores_access() {
    let (mut device, sim) = connected(config()).await;
    let data = pattern(0x1000, 9);

    let mut progress = cancel_after(&device, 0x200);
    let err = device.write_partition("boot", &data, &mut progress).await.unwrap_err();
    assert!(!err.is_fatal());
    assert!(matches!(err, Error::Stage { stage: Stage::Da, .. }));

    sim.replug();
    device.connect().await.unwrap();
    assert_eq!(device.stage(), Stage::Da);
    assert_eq!(sim.state().handshakes, 2);

    let read = device.read_partition("boot", &mut no_progress()).await.unwrap();
    assert_eq!(&read[..0x200], &data[..0x200]);

    device.disconnect(false).await.unwrap();
    assert_eq!(sim.state().shutdown, Some(false));
}

#[tokio::test]
async fn disconnect_after_a_cancelled_write_sends_nothing() {
    let (mut device, sim) = connected(config()).await;
    let data = pattern(0x1000, 3);

    let mut progress = cancel_after(&device, 0x200);
    device.write_partition("boot", &data, &mut progress).await.unwrap_err();
    device.disconnect(true).await.unwrap();

    assert_eq!(device.stage(), Stage::Disconnected);
    assert_eq!(sim.state().shutdown, None);
}

#[tokio::test]
async fn erase_zeroes_the_partition() {
    let mut disk = gpt_disk(CAPACITY, PARTS);
    let start = 320 * BS;
    disk[start..start + 2048 * BS].fill(0xFF);
    let (mut device, sim) = connected(SimConfig::new(0x1234, SimDa::XFlash, disk)).await;

    device.erase_partition("system", &mut no_progress()).await.unwrap();
    assert!(sim.state().user()[start..start + 2048 * BS].iter().all(|&b| b == 0));
}

#[tokio::test]
async fn raw_table_dump_holds_the_gpt() {
    let (mut device, _sim) = connected(config()).await;
    let blob = device.dump_partition_table().await.unwrap();
    assert_eq!(blob.len(), 2 * BS + 16384);
    assert_eq!(&blob[BS..BS + 8], b"EFI PART");
}

#[tokio::test]
async fn garbage_before_a_frame_is_skipped() {
    let mut config = config();
    config.noise_before_sync = 37;
    let (device, _sim) = connected(config).await;
    assert_eq!(device.stage(), Stage::Da);
}

#[tokio::test]
async fn endless_garbage_drops_the_session() {
    init_logger();
    let mut config = config();
    config.noise_before_sync = 0x2000;
    let (port, _sim) = spawn_device(config);
    let mut device = DeviceBuilder::default()
        .with_mtk_port(Box::new(port))
        .with_images(images(test_da(DAType::V5, 0x1234, 3)))
        .with_dialects(dialects(0x1234, DAType::V5))
        .build()
        .unwrap();

    let err = device.connect().await.unwrap_err();
    assert!(matches!(err.root(), Error::Transport(_)));
    assert!(err.is_fatal());
    assert_eq!(device.stage(), Stage::Disconnected);
}
