// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Streams a queue of assets through the loader on the software device.

use framestream::asset::{AssetRequest, DecodedImage, encode_png, encode_raw};
use framestream::gpu::{Format, ResourceState};
use framestream::imp::soft::SoftDevice;
use framestream::loader::{Loader, LoaderConfig, LoaderState, WorkQueue, handoff};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

fn fixture_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("framestream_{name}_{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn image(width: u32, height: u32, seed: u8) -> DecodedImage {
    DecodedImage {
        width,
        height,
        format: Format::Rgba8Unorm,
        pixels: (0..width as usize * height as usize * 4)
            .map(|i| (i % 251) as u8 ^ seed)
            .collect(),
    }
}

fn write_raw(dir: &Path, name: &str, image: &DecodedImage) -> AssetRequest {
    let path = dir.join(name);
    std::fs::write(&path, encode_raw(image, b"fixture")).unwrap();
    AssetRequest::new(path)
}

fn started_loader(device: &Arc<SoftDevice>, config: LoaderConfig) -> Loader<SoftDevice> {
    let mut loader = Loader::new(device.clone(), config).unwrap();
    loader.init_image("splash", image(8, 8, 0)).unwrap();
    loader
}

#[test]
fn oversized_asset_is_skipped_and_order_kept() {
    let dir = fixture_dir("scenario");
    let a = image(64, 64, 1);
    let b = image(2000, 2000, 2);
    let c = image(128, 128, 3);
    let work: WorkQueue = [
        write_raw(&dir, "a.raw", &a),
        write_raw(&dir, "b.raw", &b),
        write_raw(&dir, "c.raw", &c),
    ]
    .into_iter()
    .collect();

    let device = Arc::new(SoftDevice::new());
    let mut loader = started_loader(&device, LoaderConfig::default());
    let (sender, receiver) = handoff();
    loader.set_consumer(sender).unwrap();
    loader.start(work.clone()).unwrap();

    let payload = receiver.wait().unwrap();
    assert_eq!(payload.len(), 2);
    assert_eq!(payload.labels(), ["a.raw", "c.raw"]);
    let textures = payload.into_vec();
    assert_eq!(textures[0].texture.read_pixels(), a.pixels);
    assert_eq!(textures[1].texture.read_pixels(), c.pixels);
    for uploaded in &textures {
        //copy queues leave what they touch in Common
        assert_eq!(uploaded.state, ResourceState::Common);
        assert_eq!(uploaded.texture.state(), ResourceState::Common);
    }
    assert_eq!((textures[1].width, textures[1].height), (128, 128));

    loader.shutdown();
    assert_eq!(loader.state(), LoaderState::Ready);
    assert!(!loader.is_streaming());
    assert!(work.is_empty());
    assert!(loader.take_error().is_none());
    assert!(device.violations().is_empty(), "{:?}", device.violations());
}

#[test]
fn bad_files_are_skipped() {
    let dir = fixture_dir("bad_files");
    let good = image(16, 16, 9);
    let truncated = dir.join("truncated.raw");
    let mut bytes = encode_raw(&image(16, 16, 4), b"");
    bytes.truncate(bytes.len() / 2);
    std::fs::write(&truncated, bytes).unwrap();
    let garbage = dir.join("garbage.raw");
    std::fs::write(&garbage, b"not an asset").unwrap();

    let work: WorkQueue = [
        AssetRequest::new(dir.join("missing.raw")),
        AssetRequest::new(truncated),
        AssetRequest::new(garbage),
        write_raw(&dir, "good.raw", &good),
    ]
    .into_iter()
    .collect();

    let device = Arc::new(SoftDevice::new());
    let mut loader = started_loader(&device, LoaderConfig::default());
    let (sender, receiver) = handoff();
    loader.set_consumer(sender).unwrap();
    loader.start(work).unwrap();
    let payload = receiver.wait().unwrap();
    assert_eq!(payload.labels(), ["good.raw"]);
    assert_eq!(payload.get(0).unwrap().texture.read_pixels(), good.pixels);
    loader.shutdown();
    assert!(loader.take_error().is_none());
}

#[test]
fn png_assets_decode_to_srgb() {
    let dir = fixture_dir("png");
    let mut source = image(20, 10, 5);
    source.format = Format::Rgba8UnormSrgb;
    let path = dir.join("tile.png");
    std::fs::write(&path, encode_png(&source).unwrap()).unwrap();

    let device = Arc::new(SoftDevice::new());
    let mut loader = started_loader(&device, LoaderConfig::default());
    let (sender, receiver) = handoff();
    loader.set_consumer(sender).unwrap();
    loader
        .start([AssetRequest::new(path).with_label("tile")].into_iter().collect())
        .unwrap();
    let payload = receiver.wait().unwrap();
    let tile = payload.get(0).unwrap();
    assert_eq!(tile.request.label, "tile");
    assert_eq!(tile.format, Format::Rgba8UnormSrgb);
    assert_eq!(tile.texture.format(), Format::Rgba8UnormSrgb);
    assert_eq!(tile.texture.read_pixels(), source.pixels);
}

#[test]
fn extent_at_capacity_is_accepted() {
    let dir = fixture_dir("capacity");
    let config = LoaderConfig {
        max_extent: (32, 32),
        ..LoaderConfig::default()
    };
    let work: WorkQueue = [
        write_raw(&dir, "exact.raw", &image(32, 32, 1)),
        write_raw(&dir, "wide.raw", &image(33, 1, 1)),
    ]
    .into_iter()
    .collect();
    let device = Arc::new(SoftDevice::new());
    let mut loader = started_loader(&device, config);
    let (sender, receiver) = handoff();
    loader.set_consumer(sender).unwrap();
    loader.start(work).unwrap();
    assert_eq!(receiver.wait().unwrap().labels(), ["exact.raw"]);
}

#[test]
fn slow_gpu_still_delivers_everything() {
    let dir = fixture_dir("slow_gpu");
    let work: WorkQueue = (0..5)
        .map(|i| write_raw(&dir, &format!("{i}.raw"), &image(32, 32, i as u8)))
        .collect();
    let device = Arc::new(SoftDevice::new());
    device.set_latency(Duration::from_millis(10));
    let config = LoaderConfig {
        pacing: Duration::from_millis(2),
        ..LoaderConfig::default()
    };
    let mut loader = started_loader(&device, config);
    let (sender, receiver) = handoff();
    loader.set_consumer(sender).unwrap();
    loader.start(work).unwrap();
    let payload = receiver.wait().unwrap();
    assert_eq!(payload.labels(), ["0.raw", "1.raw", "2.raw", "3.raw", "4.raw"]);
    for (i, uploaded) in payload.iter().enumerate() {
        assert_eq!(uploaded.texture.read_pixels(), image(32, 32, i as u8).pixels);
    }
    //restaging while a copy still reads the trampoline would show up here
    assert!(device.violations().is_empty(), "{:?}", device.violations());
}

#[test]
fn device_loss_stops_the_worker() {
    let dir = fixture_dir("device_loss");
    let work: WorkQueue = [
        write_raw(&dir, "a.raw", &image(8, 8, 1)),
        write_raw(&dir, "b.raw", &image(8, 8, 2)),
    ]
    .into_iter()
    .collect();
    let device = Arc::new(SoftDevice::new());
    let mut loader = started_loader(&device, LoaderConfig::default());
    device.lose("unplugged");
    let (sender, receiver) = handoff();
    loader.set_consumer(sender).unwrap();
    loader.start(work).unwrap();
    let payload = receiver.wait().unwrap();
    assert!(payload.is_empty());
    loader.shutdown();
    assert_eq!(loader.state(), LoaderState::Ready);
    assert!(loader.take_error().is_some());
    assert!(loader.take_error().is_none());
}

#[test_executors::async_test]
async fn payload_can_be_awaited() {
    let dir = fixture_dir("awaited");
    let device = Arc::new(SoftDevice::new());
    let mut loader = started_loader(&device, LoaderConfig::default());
    let (sender, receiver) = handoff();
    loader.set_consumer(sender).unwrap();
    loader
        .start([write_raw(&dir, "only.raw", &image(4, 4, 7))].into_iter().collect())
        .unwrap();
    let payload = receiver.receive().await.unwrap();
    assert_eq!(payload.labels(), ["only.raw"]);
}
