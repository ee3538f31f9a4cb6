//! One user's view of the system: the current document and its index.
//!
//! A [`Session`] rebuilds the index only when the uploaded file changes, and
//! cancels an in-flight build as soon as a different file supersedes it.

use std::{
    fmt,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio_util::sync::CancellationToken;

use crate::{
    cpu_limit::CpuLimit,
    document::PdfDocument,
    errors::PipelineError,
    index::DocumentIndex,
    pipeline::Pipeline,
    prelude::*,
    progress::ProgressSink,
    rasterize::PageSource,
};

/// Raw bytes of an uploaded file, plus the name it was uploaded under.
pub struct Upload {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    /// Read an upload from disk.
    pub async fn from_path(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {:?}", path.display()))?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self { name, bytes })
    }

    /// The identity used to decide whether a cached index is still valid.
    pub fn identity(&self) -> FileIdentity {
        FileIdentity::new(&self.name, &self.bytes)
    }
}

/// Identifies one version of one uploaded file.
///
/// Two uploads with the same name but different content are different files.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FileIdentity {
    name: String,
    digest: blake3::Hash,
}

impl FileIdentity {
    pub fn new(name: &str, bytes: &[u8]) -> Self {
        Self {
            name: name.to_owned(),
            digest: blake3::hash(bytes),
        }
    }
}

impl fmt::Display for FileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.digest.to_hex();
        write!(f, "{} ({})", self.name, &hex[..12])
    }
}

/// Holds the index of at most one file. Inserting another file evicts it.
#[derive(Default)]
pub struct IndexCache {
    entry: Option<(FileIdentity, Arc<DocumentIndex>)>,
}

impl IndexCache {
    /// The cached index, if it belongs to `identity`.
    pub fn get(&self, identity: &FileIdentity) -> Option<Arc<DocumentIndex>> {
        self.entry
            .as_ref()
            .filter(|(cached, _)| cached == identity)
            .map(|(_, index)| index.clone())
    }

    /// Replace whatever we had with `index`.
    pub fn insert(&mut self, identity: FileIdentity, index: Arc<DocumentIndex>) {
        self.entry = Some((identity, index));
    }

    /// The identity of the cached file, if any.
    pub fn current(&self) -> Option<&FileIdentity> {
        self.entry.as_ref().map(|(identity, _)| identity)
    }
}

/// The run currently building an index.
struct InFlight {
    generation: u64,
    cancel: CancellationToken,
}

/// Owns the cache and the in-flight run for one user.
pub struct Session {
    pipeline: Pipeline,
    cpu_limit: CpuLimit,
    cache: Mutex<IndexCache>,
    in_flight: Mutex<Option<InFlight>>,
    generation: AtomicU64,
    /// Parent of every run's token. Cancelled when the session ends.
    shutdown: CancellationToken,
}

impl Session {
    pub fn new(pipeline: Pipeline, cpu_limit: CpuLimit) -> Self {
        Self {
            pipeline,
            cpu_limit,
            cache: Mutex::new(IndexCache::default()),
            in_flight: Mutex::new(None),
            generation: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        }
    }

    /// A token that ends the session (and any run in it) when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// The pipeline we build indices with.
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// The file whose index is cached, if any.
    pub fn current_document(&self) -> Option<FileIdentity> {
        self.lock_cache().current().cloned()
    }

    /// Get the index for `upload`, building it unless it is already cached.
    #[instrument(level = "debug", skip_all, fields(name = %upload.name))]
    pub async fn open(
        &self,
        upload: &Upload,
        progress: &dyn ProgressSink,
    ) -> Result<Arc<DocumentIndex>, PipelineError> {
        let bytes = &upload.bytes;
        let cpu_limit = self.cpu_limit.clone();
        self.open_with(upload, progress, move || async move {
            PdfDocument::from_bytes(bytes, cpu_limit)
                .await
                .map(|document| Arc::new(document) as Arc<dyn PageSource>)
        })
        .await
    }

    /// Like [`Session::open`], but with a custom way to load the document.
    ///
    /// The run is registered before loading starts, so a newer upload
    /// supersedes this one even while it is still loading.
    async fn open_with<Load, Fut>(
        &self,
        upload: &Upload,
        progress: &dyn ProgressSink,
        load: Load,
    ) -> Result<Arc<DocumentIndex>, PipelineError>
    where
        Load: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<dyn PageSource>, PipelineError>>,
    {
        let identity = upload.identity();
        let cached = self.lock_cache().get(&identity);
        if let Some(index) = cached {
            debug!(%identity, "Reusing cached index");
            self.cancel_in_flight();
            return Ok(index);
        }

        let (generation, cancel) = self.start_run();
        let source = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PipelineError::Cancelled),
            source = load() => source,
        };
        let source = match source {
            Ok(source) => source,
            Err(err) => {
                self.finish_run(generation);
                return Err(err);
            }
        };

        info!(%identity, pages = source.page_count(), "Indexing document");
        let result = self.pipeline.index(source, progress, &cancel).await;
        let still_current = self.finish_run(generation);

        let index = Arc::new(result?);
        if still_current {
            self.lock_cache().insert(identity, index.clone());
        } else {
            debug!(%identity, "Not caching index from a superseded run");
        }
        Ok(index)
    }

    /// Cancel everything. The session cannot build anything afterwards.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    /// Register a new run, cancelling the previous one.
    fn start_run(&self) -> (u64, CancellationToken) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = self.shutdown.child_token();
        let previous = self.lock_in_flight().replace(InFlight {
            generation,
            cancel: cancel.clone(),
        });
        if let Some(previous) = previous {
            debug!(generation = previous.generation, "Superseding in-flight run");
            previous.cancel.cancel();
        }
        (generation, cancel)
    }

    /// Cancel the run in flight, if any, without starting a new one.
    fn cancel_in_flight(&self) {
        if let Some(previous) = self.lock_in_flight().take() {
            debug!(generation = previous.generation, "Cancelling in-flight run");
            previous.cancel.cancel();
        }
    }

    /// Forget run `generation`. Returns false if a newer run replaced it.
    fn finish_run(&self, generation: u64) -> bool {
        let mut in_flight = self.lock_in_flight();
        match in_flight.as_ref() {
            Some(run) if run.generation == generation => {
                *in_flight = None;
                true
            }
            _ => false,
        }
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, IndexCache> {
        self.cache.lock().expect("index cache lock poisoned")
    }

    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, Option<InFlight>> {
        self.in_flight.lock().expect("in-flight lock poisoned")
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::atomic::AtomicUsize, time::Duration};

    use futures::future::{Ready, ready};
    use image::{GrayImage, Luma};

    use super::*;
    use crate::{
        config::PipelineConfig, ocr::OcrEngine, progress::NoProgress,
        rasterize::PixelBuffer,
    };

    struct Pages(usize);

    #[async_trait]
    impl PageSource for Pages {
        fn page_count(&self) -> usize {
            self.0
        }

        async fn rasterize(&self, _page_idx: usize, _zoom: f32) -> Result<PixelBuffer> {
            Ok(PixelBuffer::new(GrayImage::from_pixel(1, 1, Luma([0]))))
        }
    }

    type Loaded = Result<Arc<dyn PageSource>, PipelineError>;

    /// A loader that opens an `n`-page document immediately.
    fn pages(n: usize) -> impl FnOnce() -> Ready<Loaded> {
        move || ready(Ok(Arc::new(Pages(n)) as Arc<dyn PageSource>))
    }

    /// A loader that takes `delay` to open an `n`-page document, like a slow
    /// `pdfinfo`.
    fn slow_pages(n: usize, delay: Duration) -> impl FnOnce() -> BoxFuture<'static, Loaded> {
        move || {
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                Ok(Arc::new(Pages(n)) as Arc<dyn PageSource>)
            })
        }
    }

    type BoxFuture<'a, T> = std::pin::Pin<Box<dyn Future<Output = T> + Send + 'a>>;

    fn upload(name: &str, bytes: &[u8]) -> Upload {
        Upload {
            name: name.to_owned(),
            bytes: bytes.to_vec(),
        }
    }

    /// Counts calls, optionally waiting on a token before answering.
    struct GatedEngine {
        calls: AtomicUsize,
        gate: Option<CancellationToken>,
    }

    #[async_trait]
    impl OcrEngine for GatedEngine {
        async fn recognize_text(&self, _pixels: PixelBuffer) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.cancelled().await;
            }
            Ok("Some Text".to_owned())
        }
    }

    /// Records status messages.
    #[derive(Default)]
    struct Statuses(Mutex<Vec<String>>);

    impl ProgressSink for Statuses {
        fn on_progress(&self, _completed: usize, _total: usize) {}

        fn on_status(&self, message: &str) {
            self.0
                .lock()
                .expect("lock poisoned")
                .push(message.to_owned());
        }
    }

    fn session(gate: Option<CancellationToken>) -> (Arc<Session>, Arc<GatedEngine>) {
        let engine = Arc::new(GatedEngine {
            calls: AtomicUsize::new(0),
            gate,
        });
        let config = PipelineConfig {
            jobs: 2,
            ..PipelineConfig::default()
        };
        let session = Session::new(Pipeline::new(engine.clone(), config), CpuLimit::new(1));
        (Arc::new(session), engine)
    }

    #[test]
    fn identity_depends_on_name_and_content() {
        let a = FileIdentity::new("scan.pdf", b"one");
        assert_eq!(a, FileIdentity::new("scan.pdf", b"one"));
        assert_ne!(a, FileIdentity::new("scan.pdf", b"two"));
        assert_ne!(a, FileIdentity::new("other.pdf", b"one"));
        assert!(a.to_string().starts_with("scan.pdf ("));
    }

    #[test]
    fn cache_holds_a_single_entry() {
        let a = FileIdentity::new("a.pdf", b"a");
        let b = FileIdentity::new("b.pdf", b"b");
        let mut cache = IndexCache::default();
        assert!(cache.get(&a).is_none());

        cache.insert(a.clone(), Arc::new(DocumentIndex::empty()));
        assert!(cache.get(&a).is_some());
        cache.insert(b.clone(), Arc::new(DocumentIndex::empty()));
        assert!(cache.get(&a).is_none());
        assert!(cache.get(&b).is_some());
        assert_eq!(cache.current(), Some(&b));
    }

    #[tokio::test]
    async fn same_identity_reuses_the_index() -> Result<()> {
        let (session, engine) = session(None);
        let scan = upload("scan.pdf", b"bytes");

        let first = session.open_with(&scan, &NoProgress, pages(3)).await?;
        assert_eq!(engine.calls.load(Ordering::SeqCst), 3);
        assert_eq!(first.search("text", 10).len(), 3);

        // The real loader would reject these bytes, so this must be a cache hit.
        let second = session.open(&scan, &NoProgress).await?;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 3);
        Ok(())
    }

    #[tokio::test]
    async fn changed_content_is_rebuilt() -> Result<()> {
        let (session, _) = session(None);
        session
            .open_with(&upload("scan.pdf", b"older bytes"), &NoProgress, pages(1))
            .await?;

        // Different content under the same name misses the cache, so we try
        // to open the new bytes (which are not a PDF).
        let result = session
            .open(&upload("scan.pdf", b"not really a pdf"), &NoProgress)
            .await;
        assert!(matches!(result, Err(PipelineError::DocumentOpen(_))));
        assert!(session.lock_in_flight().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn unreadable_documents_report_no_progress() {
        let (session, _) = session(None);
        let statuses = Statuses::default();

        let result = session
            .open(&upload("scan.pdf", b"not really a pdf"), &statuses)
            .await;

        assert!(matches!(result, Err(PipelineError::DocumentOpen(_))));
        assert!(statuses.0.lock().expect("lock poisoned").is_empty());
    }

    #[tokio::test]
    async fn a_new_file_cancels_the_run_in_flight() -> Result<()> {
        let gate = CancellationToken::new();
        let (session, _) = session(Some(gate.clone()));

        let slow = {
            let session = session.clone();
            tokio::spawn(async move {
                session
                    .open_with(&upload("slow.pdf", b"slow"), &NoProgress, pages(4))
                    .await
            })
        };
        // Wait until the slow run has started.
        while session.lock_in_flight().is_none() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        // Supersede it. Release the gate only after the new run has
        // cancelled the old one.
        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            gate.cancel();
        });
        let fresh = session
            .open_with(&upload("fresh.pdf", b"fresh"), &NoProgress, pages(2))
            .await?;
        release.await?;

        let slow_result = slow.await?;
        assert!(matches!(slow_result, Err(PipelineError::Cancelled)));
        assert_eq!(fresh.len(), 2);
        assert_eq!(
            session.current_document(),
            Some(FileIdentity::new("fresh.pdf", b"fresh"))
        );
        Ok(())
    }

    #[tokio::test]
    async fn newest_upload_wins_even_if_an_older_one_is_still_loading() -> Result<()> {
        let (session, _) = session(None);

        let old = {
            let session = session.clone();
            tokio::spawn(async move {
                session
                    .open_with(
                        &upload("old.pdf", b"old"),
                        &NoProgress,
                        slow_pages(3, Duration::from_millis(300)),
                    )
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let new = session
            .open_with(&upload("new.pdf", b"new"), &NoProgress, pages(2))
            .await?;

        let old_result = old.await?;
        assert!(matches!(old_result, Err(PipelineError::Cancelled)));
        assert_eq!(new.len(), 2);
        assert_eq!(
            session.current_document(),
            Some(FileIdentity::new("new.pdf", b"new"))
        );
        assert!(session.lock_in_flight().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn reopening_a_cached_file_cancels_the_run_in_flight() -> Result<()> {
        let (session, _) = session(None);
        let cached = upload("cached.pdf", b"cached");
        session.open_with(&cached, &NoProgress, pages(1)).await?;

        let other = {
            let session = session.clone();
            tokio::spawn(async move {
                session
                    .open_with(
                        &upload("other.pdf", b"other"),
                        &NoProgress,
                        slow_pages(2, Duration::from_millis(300)),
                    )
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let index = session.open_with(&cached, &NoProgress, pages(1)).await?;
        assert_eq!(index.len(), 1);
        assert!(matches!(other.await?, Err(PipelineError::Cancelled)));
        assert_eq!(
            session.current_document(),
            Some(FileIdentity::new("cached.pdf", b"cached"))
        );
        Ok(())
    }

    #[tokio::test]
    async fn closing_the_session_cancels_runs() {
        let (session, engine) = session(None);
        session.close();

        let result = session
            .open_with(&upload("a.pdf", b"a"), &NoProgress, pages(1))
            .await;
        assert!(matches!(result, Err(PipelineError::Cancelled)));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }
}
