#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use eink_photo_frame::config::SelectionOptions;
use eink_photo_frame::error::{RenderError, SourceError};
use eink_photo_frame::frame::{Frame, FrameOptions};
use eink_photo_frame::render::Renderer;
use eink_photo_frame::source::{AssetSource, RemoteAsset};
use eink_photo_frame::state::Style;
use eink_photo_frame::sync::SyncOptions;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use tempfile::TempDir;

pub fn png_bytes(shade: u8) -> Vec<u8> {
    let img = RgbImage::from_pixel(4, 3, Rgb([shade, 255 - shade, 128]));
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

#[derive(Default)]
struct Album {
    assets: Vec<RemoteAsset>,
    payloads: HashMap<String, Vec<u8>>,
    failing: HashSet<String>,
    listing_fails: bool,
    listing_delay: Option<Duration>,
    downloads: Vec<String>,
    listings: usize,
}

/// In-memory shared album. Clones share the same album.
#[derive(Clone, Default)]
pub struct FakeSource {
    album: Arc<Mutex<Album>>,
}

impl FakeSource {
    pub fn with_assets(ids: &[&str]) -> Self {
        let source = Self::default();
        for id in ids {
            source.add(id);
        }
        source
    }

    pub fn add(&self, id: &str) {
        let mut album = self.album.lock().unwrap();
        let shade = (album.assets.len() as u8).wrapping_mul(40);
        album.assets.push(RemoteAsset {
            id: id.to_string(),
            filename: format!("IMG_{id}.PNG"),
        });
        album.payloads.insert(id.to_string(), png_bytes(shade));
    }

    pub fn remove(&self, id: &str) {
        let mut album = self.album.lock().unwrap();
        album.assets.retain(|asset| asset.id != id);
        album.payloads.remove(id);
    }

    pub fn fail_download(&self, id: &str) {
        self.album.lock().unwrap().failing.insert(id.to_string());
    }

    pub fn fail_listing(&self) {
        self.album.lock().unwrap().listing_fails = true;
    }

    pub fn clear_failures(&self) {
        let mut album = self.album.lock().unwrap();
        album.failing.clear();
        album.listing_fails = false;
    }

    pub fn delay_listing(&self, delay: Duration) {
        self.album.lock().unwrap().listing_delay = Some(delay);
    }

    pub fn downloads(&self) -> Vec<String> {
        self.album.lock().unwrap().downloads.clone()
    }

    /// Number of album listings requested so far.
    pub fn listings(&self) -> usize {
        self.album.lock().unwrap().listings
    }
}

impl AssetSource for FakeSource {
    async fn list_assets(&self, album: &str) -> Result<Vec<RemoteAsset>, SourceError> {
        let (delay, result) = {
            let mut state = self.album.lock().unwrap();
            state.listings += 1;
            let result = if state.listing_fails {
                Err(SourceError::Auth(format!("{album}: credentials rejected")))
            } else {
                Ok(state.assets.clone())
            };
            (state.listing_delay, result)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        result
    }

    async fn download_asset(&self, id: &str) -> Result<Vec<u8>, SourceError> {
        let mut album = self.album.lock().unwrap();
        album.downloads.push(id.to_string());
        if album.failing.contains(id) {
            return Err(SourceError::Transport(format!("connection reset fetching {id}")));
        }
        album
            .payloads
            .get(id)
            .cloned()
            .ok_or_else(|| SourceError::Protocol(format!("unknown asset {id}")))
    }
}

/// Records every render instead of driving a panel.
#[derive(Clone, Default)]
pub struct RecordingRenderer {
    renders: Arc<Mutex<Vec<(PathBuf, Style)>>>,
    failing: Arc<AtomicBool>,
    rejected: Arc<Mutex<HashSet<String>>>,
    delay: Arc<Mutex<Option<Duration>>>,
}

impl RecordingRenderer {
    pub fn renders(&self) -> Vec<(PathBuf, Style)> {
        self.renders.lock().unwrap().clone()
    }

    pub fn rendered_files(&self) -> Vec<String> {
        self.renders()
            .iter()
            .filter_map(|(path, _)| path.file_name()?.to_str().map(str::to_string))
            .collect()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Fails every render of this cache file, as a panel rejecting it would.
    pub fn reject(&self, file: &str) {
        self.rejected.lock().unwrap().insert(file.to_string());
    }

    /// Makes every render take `delay`, like a slow panel refresh.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }
}

impl Renderer for RecordingRenderer {
    async fn render(&self, image: &Path, style: Style) -> Result<(), RenderError> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(RenderError::Timeout(Duration::from_secs(1)));
        }
        let rejected = image
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| self.rejected.lock().unwrap().contains(name));
        if rejected {
            return Err(RenderError::Timeout(Duration::from_secs(1)));
        }
        assert!(image.is_file(), "asked to render missing {}", image.display());
        self.renders
            .lock()
            .unwrap()
            .push((image.to_path_buf(), style));
        Ok(())
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub source: FakeSource,
    pub renderer: RecordingRenderer,
    pub frame: Arc<Frame<FakeSource, RecordingRenderer>>,
}

impl Harness {
    pub fn new(source: FakeSource) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let renderer = RecordingRenderer::default();
        let frame = Arc::new(Frame::new(
            source.clone(),
            renderer.clone(),
            frame_options(dir.path()),
        ));
        Self {
            dir,
            source,
            renderer,
            frame,
        }
    }

    /// A second frame over the same files, as after a restart.
    pub fn restarted(&self) -> Frame<FakeSource, RecordingRenderer> {
        Frame::new(
            self.source.clone(),
            RecordingRenderer::default(),
            frame_options(self.dir.path()),
        )
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.dir.path().join("photos")
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.path().join("state.json")
    }
}

pub fn frame_options(root: &Path) -> FrameOptions {
    FrameOptions {
        cache_dir: root.join("photos"),
        state_path: root.join("state.json"),
        ledger_path: root.join("assets.json"),
        album: "Family".to_string(),
        jpeg_quality: 85,
        selection: SelectionOptions {
            seed: Some(7),
            ..SelectionOptions::default()
        },
    }
}

pub fn sync_options(root: &Path) -> SyncOptions {
    SyncOptions {
        album: "Family".to_string(),
        cache_dir: root.join("photos"),
        ledger_path: root.join("assets.json"),
        jpeg_quality: 85,
    }
}

pub fn cached_files(dir: &Path) -> Vec<String> {
    eink_photo_frame::library::list_images(dir).unwrap()
}

/// Polls `condition` until it holds or `limit` elapses.
pub async fn wait_until(limit: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
