//! Deduplicating texture and model loader.

use std::sync::{Arc, OnceLock};

use keel_scene::{DecodedModel, ImageSource, TextureKey, TextureRef, decode_model};
use rustc_hash::FxHashMap;

use crate::error::LoadError;
use crate::fetch::Fetcher;
use crate::pool::WorkerPool;

/// RGBA8 pixels ready for upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl DecodedImage {
    pub fn decode(bytes: &[u8]) -> Result<Self, image::ImageError> {
        let img = image::load_from_memory(bytes)?.to_rgba8();
        Ok(Self {
            width: img.width(),
            height: img.height(),
            rgba: img.into_raw(),
        })
    }
}

/// Shared result of one load. Every requester of the same key holds the same slot.
#[derive(Debug)]
pub struct AssetSlot<T> {
    key: String,
    state: OnceLock<Result<Arc<T>, String>>,
}

impl<T> AssetSlot<T> {
    fn new(key: String) -> Self {
        Self {
            key,
            state: OnceLock::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_pending(&self) -> bool {
        self.state.get().is_none()
    }

    /// The loaded asset, once available.
    pub fn get(&self) -> Option<&Arc<T>> {
        self.state.get()?.as_ref().ok()
    }

    /// Why the load failed, if it did.
    pub fn error(&self) -> Option<&str> {
        self.state.get()?.as_ref().err().map(String::as_str)
    }

    fn resolve(&self, result: Result<T, String>) {
        if self.state.set(result.map(Arc::new)).is_err() {
            log::debug!("asset '{}' resolved twice, keeping the first result", self.key);
        }
    }
}

pub type TextureHandle = Arc<AssetSlot<DecodedImage>>;
pub type ModelHandle = Arc<AssetSlot<DecodedModel>>;

/// Completion notices returned by [`AssetLoader::poll`].
#[derive(Clone, Debug, PartialEq)]
pub enum LoadEvent {
    TextureReady(TextureKey),
    /// The texture keeps drawing with the placeholder.
    TextureFailed { key: TextureKey, error: String },
    ModelReady(String),
    /// The previously displayed scene is left untouched.
    ModelFailed { source: String, error: String },
}

enum Job {
    Texture { key: TextureKey, source: ImageSource },
    Model { source: String },
}

enum Done {
    Texture {
        key: TextureKey,
        result: Result<DecodedImage, LoadError>,
    },
    Model {
        source: String,
        result: Result<DecodedModel, LoadError>,
    },
}

fn run_job(fetcher: &dyn Fetcher, job: Job) -> Done {
    match job {
        Job::Texture { key, source } => {
            let result = match source {
                ImageSource::Uri(path) => fetcher
                    .fetch(&path)
                    .map_err(LoadError::from)
                    .and_then(|bytes| Ok(DecodedImage::decode(&bytes)?)),
                ImageSource::Embedded { bytes, .. } => {
                    DecodedImage::decode(&bytes).map_err(LoadError::from)
                }
            };
            Done::Texture { key, result }
        }
        Job::Model { source } => {
            log::info!("loading model {source}");
            let result = fetcher
                .fetch(&source)
                .map_err(LoadError::from)
                .and_then(|bytes| Ok(decode_model(&bytes)?));
            Done::Model { source, result }
        }
    }
}

/// Texture and model loads, deduplicated by key and run on a worker pool.
///
/// In-flight loads cannot be cancelled. A result for a path nobody currently
/// wants is still cached, since it can only be looked up by that path.
pub struct AssetLoader {
    pool: WorkerPool<Job, Done>,
    textures: FxHashMap<TextureKey, TextureHandle>,
    models: FxHashMap<String, ModelHandle>,
    /// Events produced outside of worker completion (e.g. a refused submit).
    deferred: Vec<LoadEvent>,
}

impl AssetLoader {
    pub fn new(fetcher: Arc<dyn Fetcher>, workers: usize) -> Self {
        let pool = WorkerPool::new(workers, move |job: Job| run_job(fetcher.as_ref(), job));
        Self {
            pool,
            textures: FxHashMap::default(),
            models: FxHashMap::default(),
            deferred: Vec::new(),
        }
    }

    /// Start loading a texture unless a load for its key exists already.
    pub fn request_texture(&mut self, texture: &TextureRef) -> TextureHandle {
        if let Some(slot) = self.textures.get(&texture.key) {
            return Arc::clone(slot);
        }
        let slot = Arc::new(AssetSlot::new(texture.key.to_string()));
        self.textures.insert(texture.key.clone(), Arc::clone(&slot));
        let job = Job::Texture {
            key: texture.key.clone(),
            source: texture.source.clone(),
        };
        if !self.pool.submit(job) {
            let error = LoadError::ShutDown.to_string();
            slot.resolve(Err(error.clone()));
            self.deferred.push(LoadEvent::TextureFailed {
                key: texture.key.clone(),
                error,
            });
        }
        slot
    }

    pub fn texture(&self, key: &TextureKey) -> Option<&TextureHandle> {
        self.textures.get(key)
    }

    /// Start loading a model unless a load for `source` exists already.
    pub fn request_model(&mut self, source: &str) -> ModelHandle {
        if let Some(slot) = self.models.get(source) {
            return Arc::clone(slot);
        }
        let slot = Arc::new(AssetSlot::new(source.to_string()));
        self.models.insert(source.to_string(), Arc::clone(&slot));
        if !self.pool.submit(Job::Model {
            source: source.to_string(),
        }) {
            let error = LoadError::ShutDown.to_string();
            slot.resolve(Err(error.clone()));
            self.deferred.push(LoadEvent::ModelFailed {
                source: source.to_string(),
                error,
            });
        }
        slot
    }

    /// Queue every model in `sources`; at most the pool's worker count fetch at once.
    pub fn preload_models<'a>(&mut self, sources: impl IntoIterator<Item = &'a str>) {
        for source in sources {
            self.request_model(source);
        }
    }

    pub fn model(&self, source: &str) -> Option<&ModelHandle> {
        self.models.get(source)
    }

    /// Collect finished loads. Never blocks.
    pub fn poll(&mut self) -> Vec<LoadEvent> {
        let mut events = std::mem::take(&mut self.deferred);
        for done in self.pool.drain_results() {
            match done {
                Done::Texture { key, result } => {
                    let Some(slot) = self.textures.get(&key) else {
                        continue;
                    };
                    match result {
                        Ok(image) => {
                            log::debug!("texture {key} ready ({}x{})", image.width, image.height);
                            slot.resolve(Ok(image));
                            events.push(LoadEvent::TextureReady(key));
                        }
                        Err(e) => {
                            log::warn!("texture {key} failed, using placeholder: {e}");
                            let error = e.to_string();
                            slot.resolve(Err(error.clone()));
                            events.push(LoadEvent::TextureFailed { key, error });
                        }
                    }
                }
                Done::Model { source, result } => {
                    let Some(slot) = self.models.get(&source) else {
                        continue;
                    };
                    match result {
                        Ok(model) => {
                            log::info!(
                                "model {source} ready: {} meshes, {} primitives",
                                model.meshes.len(),
                                model.primitive_count()
                            );
                            slot.resolve(Ok(model));
                            events.push(LoadEvent::ModelReady(source));
                        }
                        Err(e) => {
                            log::warn!("model {source} failed: {e}");
                            let error = e.to_string();
                            slot.resolve(Err(error.clone()));
                            // Failed models may be retried by requesting again.
                            self.models.remove(&source);
                            events.push(LoadEvent::ModelFailed { source, error });
                        }
                    }
                }
            }
        }
        events
    }

    /// Loads queued or running on the workers.
    pub fn in_flight(&self) -> usize {
        self.pool.in_flight_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::pool::DEFAULT_WORKERS;
    use keel_scene::WrapMode;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    /// In-memory fetcher that counts requests per path.
    #[derive(Default)]
    struct CountingFetcher {
        files: FxHashMap<String, Vec<u8>>,
        counts: Mutex<FxHashMap<String, usize>>,
        delay: Duration,
    }

    impl CountingFetcher {
        fn count(&self, path: &str) -> usize {
            self.counts.lock().unwrap().get(path).copied().unwrap_or(0)
        }
    }

    impl Fetcher for CountingFetcher {
        fn fetch(&self, path: &str) -> Result<Vec<u8>, FetchError> {
            *self.counts.lock().unwrap().entry(path.to_string()).or_default() += 1;
            std::thread::sleep(self.delay);
            self.files.get(path).cloned().ok_or_else(|| FetchError::Status {
                url: path.to_string(),
                status: 404,
            })
        }
    }

    fn png(w: u32, h: u32) -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(w, h, image::Rgba([200, 100, 50, 255]));
        let mut out = std::io::Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn poll_until(loader: &mut AssetLoader, n: usize) -> Vec<LoadEvent> {
        let mut events = Vec::new();
        let start = Instant::now();
        while events.len() < n {
            events.extend(loader.poll());
            assert!(start.elapsed() < Duration::from_secs(5), "timed out");
            std::thread::sleep(Duration::from_millis(1));
        }
        events
    }

    fn fetcher_with(files: &[(&str, Vec<u8>)]) -> Arc<CountingFetcher> {
        Arc::new(CountingFetcher {
            files: files.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            delay: Duration::from_millis(20),
            ..Default::default()
        })
    }

    #[test]
    fn test_same_path_fetched_once() {
        let fetcher = fetcher_with(&[("wood.png", png(4, 2))]);
        let mut loader = AssetLoader::new(fetcher.clone(), DEFAULT_WORKERS);
        let tex = TextureRef::from_path("wood.png", WrapMode::Repeat);

        let a = loader.request_texture(&tex);
        let b = loader.request_texture(&tex);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(a.is_pending());

        let events = poll_until(&mut loader, 1);
        assert_eq!(events, vec![LoadEvent::TextureReady(tex.key.clone())]);
        let c = loader.request_texture(&tex);
        assert!(Arc::ptr_eq(&a, &c));
        assert_eq!(fetcher.count("wood.png"), 1);

        let image = a.get().unwrap();
        assert_eq!((image.width, image.height), (4, 2));
        assert_eq!(image.rgba.len(), 4 * 2 * 4);
    }

    #[test]
    fn test_failed_texture_reports_and_keeps_slot() {
        let fetcher = fetcher_with(&[]);
        let mut loader = AssetLoader::new(fetcher.clone(), 1);
        let tex = TextureRef::from_path("missing.png", WrapMode::Clamp);
        let slot = loader.request_texture(&tex);

        let events = poll_until(&mut loader, 1);
        assert!(matches!(&events[0], LoadEvent::TextureFailed { key, .. } if *key == tex.key));
        assert!(slot.get().is_none());
        assert!(slot.error().unwrap().contains("404"));
        // No retry for textures: the placeholder stays.
        loader.request_texture(&tex);
        assert_eq!(fetcher.count("missing.png"), 1);
    }

    #[test]
    fn test_undecodable_texture_fails() {
        let fetcher = fetcher_with(&[("bad.png", vec![1, 2, 3])]);
        let mut loader = AssetLoader::new(fetcher, 1);
        let slot = loader.request_texture(&TextureRef::from_path("bad.png", WrapMode::Repeat));
        let events = poll_until(&mut loader, 1);
        assert!(matches!(events[0], LoadEvent::TextureFailed { .. }));
        assert!(slot.error().is_some());
    }

    #[test]
    fn test_embedded_texture_needs_no_fetch() {
        let fetcher = fetcher_with(&[]);
        let mut loader = AssetLoader::new(fetcher.clone(), 1);
        let bytes = png(1, 1);
        let tex = TextureRef {
            key: TextureKey::embedded(&bytes),
            source: ImageSource::Embedded {
                bytes: Arc::from(bytes.as_slice()),
                mime: Some("image/png".into()),
            },
            wrap: WrapMode::Repeat,
        };
        let slot = loader.request_texture(&tex);
        poll_until(&mut loader, 1);
        assert!(slot.get().is_some());
        assert!(fetcher.counts.lock().unwrap().is_empty());
    }

    #[test]
    fn test_preload_dedups_and_reports_failures() {
        let fetcher = fetcher_with(&[("broken.glb", b"not a container".to_vec())]);
        let mut loader = AssetLoader::new(fetcher.clone(), DEFAULT_WORKERS);
        loader.preload_models(["broken.glb", "broken.glb", "absent.glb"]);

        let events = poll_until(&mut loader, 2);
        assert!(events.iter().all(|e| matches!(e, LoadEvent::ModelFailed { .. })));
        assert_eq!(fetcher.count("broken.glb"), 1);
        assert_eq!(fetcher.count("absent.glb"), 1);
        assert!(loader.model("broken.glb").is_none());
    }
}
