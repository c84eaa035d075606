// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Loader shutdown and handoff lifetimes.

use framestream::asset::{AssetRequest, DecodedImage, encode_raw};
use framestream::gpu::Format;
use framestream::imp::soft::SoftDevice;
use framestream::loader::{HandoffError, Loader, LoaderConfig, LoaderState, WorkQueue, handoff};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn fixture_queue(name: &str, count: usize) -> WorkQueue {
    let dir: PathBuf =
        std::env::temp_dir().join(format!("framestream_{name}_{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    (0..count)
        .map(|i| {
            let image = DecodedImage {
                width: 8,
                height: 8,
                format: Format::Rgba8Unorm,
                pixels: vec![i as u8; 8 * 8 * 4],
            };
            let path = dir.join(format!("{i}.raw"));
            std::fs::write(&path, encode_raw(&image, b"")).unwrap();
            AssetRequest::new(path)
        })
        .collect()
}

fn ready_loader(device: &Arc<SoftDevice>, pacing: Duration) -> Loader<SoftDevice> {
    let config = LoaderConfig {
        pacing,
        ..LoaderConfig::default()
    };
    let mut loader = Loader::new(device.clone(), config).unwrap();
    let splash = DecodedImage {
        width: 2,
        height: 2,
        format: Format::Rgba8Unorm,
        pixels: vec![0; 16],
    };
    loader.init_image("splash", splash).unwrap();
    loader
}

#[test]
fn shutdown_stops_early_and_is_idempotent() {
    let work = fixture_queue("early_stop", 20);
    let device = Arc::new(SoftDevice::new());
    let mut loader = ready_loader(&device, Duration::from_millis(25));
    let (sender, receiver) = handoff();
    loader.set_consumer(sender).unwrap();
    loader.start(work.clone()).unwrap();
    assert!(loader.is_streaming());

    loader.shutdown();
    loader.shutdown();
    assert_eq!(loader.state(), LoaderState::Ready);
    assert!(!loader.is_streaming());
    let payload = receiver.wait().unwrap();
    assert!(payload.len() < 20);
    assert_eq!(payload.len() + work.len(), 20);
}

#[test]
fn shutdown_before_start() {
    let device = Arc::new(SoftDevice::new());
    let mut loader = ready_loader(&device, Duration::ZERO);
    loader.shutdown();
    loader.shutdown();
    assert_eq!(loader.state(), LoaderState::Streaming);
}

#[test]
fn drop_joins_and_delivers() {
    let work = fixture_queue("drop_joins", 4);
    let device = Arc::new(SoftDevice::new());
    let mut loader = ready_loader(&device, Duration::from_millis(5));
    let (sender, mut receiver) = handoff();
    loader.set_consumer(sender).unwrap();
    loader.start(work).unwrap();
    drop(loader);
    //the worker delivered before the join returned
    let payload = receiver.try_receive().unwrap().unwrap();
    assert!(payload.len() <= 4);
    assert_eq!(receiver.try_receive().unwrap_err(), HandoffError::AlreadyReceived);
}

#[test]
fn consumer_gone_before_delivery() {
    let work = fixture_queue("consumer_gone", 3);
    let device = Arc::new(SoftDevice::new());
    let mut loader = ready_loader(&device, Duration::ZERO);
    let (sender, receiver) = handoff();
    loader.set_consumer(sender).unwrap();
    drop(receiver);
    loader.start(work).unwrap();
    loader.shutdown();
    assert_eq!(loader.state(), LoaderState::Ready);
    assert!(loader.take_error().is_none());
}

#[test]
fn never_started_loader_abandons_its_consumer() {
    let device = Arc::new(SoftDevice::new());
    let mut loader = ready_loader(&device, Duration::ZERO);
    let (sender, receiver) = handoff();
    loader.set_consumer(sender).unwrap();
    drop(loader);
    assert_eq!(receiver.wait().unwrap_err(), HandoffError::Abandoned);
}

#[test]
fn started_without_consumer_still_finishes() {
    let work = fixture_queue("no_consumer", 2);
    let device = Arc::new(SoftDevice::new());
    let mut loader = ready_loader(&device, Duration::ZERO);
    loader.start(work.clone()).unwrap();
    loader.shutdown();
    assert_eq!(loader.state(), LoaderState::Ready);
}
