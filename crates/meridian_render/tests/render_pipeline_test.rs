use async_trait::async_trait;
use meridian_error::{ErrorClass, HttpError, MeridianResult};
use meridian_kv::{KvStore, MemoryKv, SharedKv};
use meridian_render::{
    Download, MediaSource, PASSIVE_URL_KEY, RenderConfig, RenderPipeline, RenderRequest,
};
use meridian_storage::{FileSystemStorage, ObjectCache, ObjectCacheConfig};
use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

struct FakeSource {
    bytes: Vec<u8>,
    delay: Duration,
    fail: bool,
    calls: AtomicUsize,
}

impl FakeSource {
    fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            delay: Duration::from_millis(10),
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaSource for FakeSource {
    async fn download(&self, _url: &str) -> MeridianResult<Download> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(HttpError::status(404, "gone").into());
        }
        Ok(Download {
            bytes: self.bytes.clone(),
            content_type: None,
        })
    }
}

fn encoded(format: image::ImageFormat) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(4, 4, image::Rgb([120, 40, 200]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, format).unwrap();
    out.into_inner()
}

struct Harness {
    pipeline: RenderPipeline,
    kv: Arc<MemoryKv>,
    source: Arc<FakeSource>,
    _dir: TempDir,
}

fn harness(source: FakeSource, config: RenderConfig) -> Harness {
    let dir = TempDir::new().unwrap();
    let kv = Arc::new(MemoryKv::new());
    let shared: SharedKv = kv.clone();
    let disk = Arc::new(FileSystemStorage::new(dir.path()).unwrap());
    let cache = Arc::new(ObjectCache::new(
        disk,
        shared.clone(),
        ObjectCacheConfig::default().with_cdn_base("https://cdn.example/media".to_string()),
    ));
    let source = Arc::new(source);
    let pipeline = RenderPipeline::new(cache, shared, source.clone(), config);
    Harness {
        pipeline,
        kv,
        source,
        _dir: dir,
    }
}

#[tokio::test]
async fn test_render_is_idempotent() {
    let h = harness(FakeSource::new(encoded(image::ImageFormat::Jpeg)), RenderConfig::default());
    let url = "https://cdn.example/p/abc.jpg?sig=1";

    let first = h.pipeline.start(RenderRequest::image(url, "Instagram")).await.unwrap();
    let filename = first.filename().to_string();
    assert!(filename.starts_with("Instagram") && filename.ends_with(".jpg"));
    let served = first.wait().await.unwrap();
    assert_eq!(served, format!("https://cdn.example/media/{}", filename));

    let again = RenderRequest::image("https://cdn.example/p/abc.jpg?sig=2", "Instagram");
    let second = h.pipeline.start(again).await.unwrap();
    assert_eq!(second.filename(), filename);
    assert!(second.is_ready());
    assert_eq!(h.source.calls(), 1);
}

#[tokio::test]
async fn test_concurrent_starts_share_one_download() {
    let h = harness(FakeSource::new(encoded(image::ImageFormat::Jpeg)), RenderConfig::default());

    let mut handles = Vec::new();
    for _ in 0..20 {
        let pipeline = h.pipeline.clone();
        handles.push(tokio::spawn(async move {
            pipeline
                .render(RenderRequest::image("https://cdn.example/shared.jpg", "TikTok"))
                .await
                .unwrap()
        }));
    }
    let mut urls = Vec::new();
    for handle in handles {
        urls.push(handle.await.unwrap());
    }
    urls.dedup();
    assert_eq!(urls.len(), 1);
    assert_eq!(h.source.calls(), 1);
}

#[tokio::test]
async fn test_heic_refused_before_download() {
    let h = harness(FakeSource::new(Vec::new()), RenderConfig::default());
    let err = h
        .pipeline
        .start(RenderRequest::image("https://cdn.example/x.HEIC?x=1", "Instagram"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("HEIC"));
    assert_eq!(h.source.calls(), 0);
}

#[tokio::test]
async fn test_failure_is_negatively_cached() {
    let mut source = FakeSource::new(Vec::new());
    source.fail = true;
    let h = harness(source, RenderConfig::default());
    let request = RenderRequest::image("https://cdn.example/missing.jpg", "Pinterest");

    let err = h.pipeline.render(request.clone()).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::NotFound);

    let err = h.pipeline.render(request.clone()).await.unwrap_err();
    assert!(err.to_string().contains("negatively cached"));
    assert_eq!(h.source.calls(), 1);

    let marker = format!("render_failed:{}", request.filename());
    assert!(h.kv.ttl(&marker).await.unwrap().unwrap() <= Duration::from_secs(300));
}

#[tokio::test(start_paused = true)]
async fn test_slow_render_times_out() {
    let mut source = FakeSource::new(encoded(image::ImageFormat::Jpeg));
    source.delay = Duration::from_secs(120);
    let h = harness(source, RenderConfig::default());

    let err = h
        .pipeline
        .render(RenderRequest::image("https://cdn.example/slow.jpg", "Snapchat"))
        .await
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::UpstreamTimeout);
}

#[tokio::test]
async fn test_png_stored_as_jpeg() {
    let h = harness(FakeSource::new(encoded(image::ImageFormat::Png)), RenderConfig::default());
    let handle = h
        .pipeline
        .start(RenderRequest::image("https://cdn.example/avatar", "Twitter").with_suffix(".jpg"))
        .await
        .unwrap();
    let filename = handle.filename().to_string();
    handle.wait().await.unwrap();

    let artifact = h.pipeline.cache().get(&filename).await.unwrap().unwrap();
    assert_eq!(artifact.mime, "image/jpeg");
    assert_eq!(image::guess_format(&artifact.bytes).unwrap(), image::ImageFormat::Jpeg);
}

#[tokio::test]
async fn test_invalid_payload_not_stored() {
    let h = harness(FakeSource::new(b"<html>login</html>".to_vec()), RenderConfig::default());
    let request = RenderRequest::video("https://cdn.example/v.mp4", "TikTok");
    let filename = request.filename();

    assert!(h.pipeline.render(request).await.is_err());
    assert!(!h.pipeline.cache().has(&filename).await.unwrap());
}

#[tokio::test]
async fn test_passive_url_served_on_demand() {
    let h = harness(FakeSource::new(encoded(image::ImageFormat::Jpeg)), RenderConfig::default());
    let filename = h
        .pipeline
        .start_passive(RenderRequest::image("https://cdn.example/extra.jpg", "Instagram"))
        .await
        .unwrap();

    assert_eq!(
        h.kv.hget(PASSIVE_URL_KEY, &filename).await.unwrap().as_deref(),
        Some("https://cdn.example/extra.jpg")
    );

    let artifact = h.pipeline.fetch_artifact(&filename).await.unwrap().unwrap();
    assert_eq!(artifact.filename, filename);
    assert_eq!(h.source.calls(), 1);

    assert!(h.pipeline.fetch_artifact("Instagram00000000.jpg").await.unwrap().is_none());
}

#[tokio::test]
async fn test_passive_recovers_after_cache_loss() {
    let h = harness(FakeSource::new(encoded(image::ImageFormat::Jpeg)), RenderConfig::default());
    let request = RenderRequest::image("https://cdn.example/lost.jpg", "Instagram");
    let filename = request.filename();
    h.pipeline.start(request.passive()).await.unwrap().wait().await.unwrap();

    h.kv.del(&format!("objcache:{}", filename)).await.unwrap();
    let artifact = h.pipeline.fetch_artifact(&filename).await.unwrap().unwrap();
    assert_eq!(artifact.mime, "image/jpeg");
    assert_eq!(h.source.calls(), 2);
}
