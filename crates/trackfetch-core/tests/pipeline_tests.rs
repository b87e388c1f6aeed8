//! End-to-end tests of the job pipeline with scripted extractors.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use id3::{Tag, TagLike};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;
use trackfetch_core::{
    CatalogStore, CoverArt, CoverFetcher, DownloadPool, DownloadRequest, Error, ErrorKind,
    ExtractedInfo, ExtractionRequest, JobDeps, JobEvent, JobOutcome, JobRegistry, MediaExtractor,
    MemoryCatalog, Phase, PoolConfig, RawEvent, Result, SOURCE_ID_LABEL, SongRecord,
    ThumbnailDescriptor,
};

/// Replays a fixed list of raw events, then writes the output file.
struct ScriptedExtractor {
    script: Vec<RawEvent>,
    info: ExtractedInfo,
}

impl ScriptedExtractor {
    fn typical(info: ExtractedInfo) -> Self {
        Self {
            script: vec![
                RawEvent::new("extract:youtube"),
                RawEvent::new("info"),
                RawEvent::new("download:destination"),
                RawEvent::transfer(0, Some(400)),
                RawEvent::transfer(200, Some(400)),
                RawEvent::transfer(400, Some(400)),
                RawEvent::new("download:finished"),
                RawEvent::new("postprocess:started"),
                RawEvent::new("postprocess:processing"),
                RawEvent::new("postprocess:finished"),
                RawEvent::new("extract:youtube"),
            ],
            info,
        }
    }
}

fn converted_path(request: &ExtractionRequest) -> PathBuf {
    PathBuf::from(request.output_template.replace("%(ext)s", "mp3"))
}

impl MediaExtractor for ScriptedExtractor {
    fn extract(
        &self,
        request: &ExtractionRequest,
        progress: &mut dyn FnMut(RawEvent),
    ) -> Result<ExtractedInfo> {
        for event in &self.script {
            progress(event.clone());
        }
        let path = converted_path(request);
        std::fs::write(&path, [0xFF_u8, 0xFB, 0x90, 0x00])?;
        Ok(ExtractedInfo {
            filepath: Some(path),
            ..self.info.clone()
        })
    }
}

/// Tracks how many extractions run at the same time.
#[derive(Default)]
struct ConcurrencyProbe {
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl MediaExtractor for ConcurrencyProbe {
    fn extract(
        &self,
        request: &ExtractionRequest,
        progress: &mut dyn FnMut(RawEvent),
    ) -> Result<ExtractedInfo> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        progress(RawEvent::new("info"));
        std::thread::sleep(Duration::from_millis(40));
        self.running.fetch_sub(1, Ordering::SeqCst);

        std::fs::write(converted_path(request), [0u8; 4])?;
        Ok(ExtractedInfo::default())
    }
}

struct StaticCover;

impl CoverFetcher for StaticCover {
    fn fetch(&self, _url: &str) -> Result<CoverArt> {
        Ok(CoverArt {
            data: vec![0xFF, 0xD8, 0xFF],
            mime_type: "image/jpeg".to_string(),
        })
    }
}

struct UnreachableCover;

impl CoverFetcher for UnreachableCover {
    fn fetch(&self, url: &str) -> Result<CoverArt> {
        Err(Error::network_error(format!("connection refused: {url}")))
    }
}

fn sample_info() -> ExtractedInfo {
    ExtractedInfo {
        id: Some("dQw4w9WgXcQ".to_string()),
        artists: Some(vec!["Alice".to_string(), "Bob".to_string()]),
        album: Some("Album".to_string()),
        description: Some("Recorded live".to_string()),
        release_date: Some("20230704".to_string()),
        thumbnail: Some("https://i.example.com/default.webp".to_string()),
        thumbnails: vec![
            ThumbnailDescriptor {
                url: "https://i.example.com/small.jpg".to_string(),
                format: None,
                preference: Some(1),
            },
            ThumbnailDescriptor {
                url: "https://i.example.com/large.jpg".to_string(),
                format: None,
                preference: Some(5),
            },
        ],
        ..Default::default()
    }
}

async fn collect(mut rx: UnboundedReceiver<JobEvent>) -> Vec<JobEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

async fn run_one(
    extractor: Arc<dyn MediaExtractor>,
    fetcher: Arc<dyn CoverFetcher>,
    request: DownloadRequest,
) -> Vec<JobEvent> {
    let (pool, rx) = DownloadPool::new(PoolConfig::default(), JobDeps::new(extractor, fetcher));
    pool.submit(request).expect("submit");
    pool.shutdown().await;
    collect(rx).await
}

fn entered_phases(events: &[JobEvent]) -> Vec<Phase> {
    events
        .iter()
        .filter_map(|e| match e {
            JobEvent::Progress(p) if p.is_phase_entry() => Some(p.phase),
            _ => None,
        })
        .collect()
}

fn terminal(events: &[JobEvent]) -> Vec<&JobOutcome> {
    events
        .iter()
        .filter_map(|e| match e {
            JobEvent::Finished(outcome) => Some(outcome),
            JobEvent::Progress(_) => None,
        })
        .collect()
}

#[tokio::test]
async fn test_successful_job_reports_phases_in_order() {
    let dir = TempDir::new().expect("temp dir");
    let request = DownloadRequest::new("My: Song/Title", "https://example.com/watch?v=1")
        .with_subtitle("Live")
        .with_track_id("track-1")
        .with_target_folder(dir.path());

    let events = run_one(
        Arc::new(ScriptedExtractor::typical(sample_info())),
        Arc::new(StaticCover),
        request,
    )
    .await;

    assert_eq!(
        entered_phases(&events),
        vec![Phase::Loading, Phase::Downloading, Phase::Converting]
    );

    let percentages: Vec<f64> = events
        .iter()
        .filter_map(|e| match e {
            JobEvent::Progress(p) => p.percentage,
            JobEvent::Finished(_) => None,
        })
        .collect();
    assert_eq!(percentages, vec![0.0, 50.0, 100.0]);

    assert!(matches!(events.last(), Some(JobEvent::Finished(_))));
    let outcomes = terminal(&events);
    assert_eq!(outcomes.len(), 1);
    let JobOutcome::Completed(track) = outcomes[0] else {
        panic!("expected completion, got {:?}", outcomes[0]);
    };
    assert_eq!(track.file_path, dir.path().join("My Song Title.mp3"));
    assert_eq!(track.track_id.as_deref(), Some("track-1"));

    for event in &events {
        if let JobEvent::Progress(p) = event {
            assert_eq!(p.track_id.as_deref(), Some("track-1"));
        }
    }

    let tag = Tag::read_from_path(&track.file_path).expect("tag written");
    assert_eq!(tag.title(), Some("My: Song/Title"));
    assert_eq!(tag.album(), Some("Album"));
    assert_eq!(tag.pictures().count(), 1);
    assert!(
        tag.extended_texts()
            .any(|t| t.description == SOURCE_ID_LABEL && t.value == "dQw4w9WgXcQ")
    );
}

#[tokio::test]
async fn test_cover_failure_still_completes() {
    let dir = TempDir::new().expect("temp dir");
    let request =
        DownloadRequest::new("Song", "https://example.com/v").with_target_folder(dir.path());

    let events = run_one(
        Arc::new(ScriptedExtractor::typical(sample_info())),
        Arc::new(UnreachableCover),
        request,
    )
    .await;

    let outcomes = terminal(&events);
    assert_eq!(outcomes.len(), 1);
    let JobOutcome::Completed(track) = outcomes[0] else {
        panic!("expected completion, got {:?}", outcomes[0]);
    };

    let tag = Tag::read_from_path(&track.file_path).expect("tag written");
    assert_eq!(tag.title(), Some("Song"));
    assert_eq!(tag.pictures().count(), 0);
}

#[tokio::test]
async fn test_malformed_release_date_fails_with_tag_write() {
    let dir = TempDir::new().expect("temp dir");
    let info = ExtractedInfo {
        release_date: Some("July 2023".to_string()),
        ..sample_info()
    };
    let request =
        DownloadRequest::new("Song", "https://example.com/v").with_target_folder(dir.path());

    let events = run_one(
        Arc::new(ScriptedExtractor::typical(info)),
        Arc::new(StaticCover),
        request,
    )
    .await;

    let outcomes = terminal(&events);
    assert_eq!(outcomes.len(), 1);
    match outcomes[0] {
        JobOutcome::Failed(failure) => assert_eq!(failure.kind, ErrorKind::TagWrite),
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_output_file_fails() {
    struct NoFileExtractor;
    impl MediaExtractor for NoFileExtractor {
        fn extract(
            &self,
            _request: &ExtractionRequest,
            _progress: &mut dyn FnMut(RawEvent),
        ) -> Result<ExtractedInfo> {
            Ok(ExtractedInfo::default())
        }
    }

    let dir = TempDir::new().expect("temp dir");
    let request =
        DownloadRequest::new("Song", "https://example.com/v").with_target_folder(dir.path());
    let events = run_one(Arc::new(NoFileExtractor), Arc::new(StaticCover), request).await;

    match terminal(&events).as_slice() {
        [JobOutcome::Failed(failure)] => assert_eq!(failure.kind, ErrorKind::FileSystem),
        other => panic!("expected a single failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_empty_title_rejected_before_any_io() {
    let probe = Arc::new(ConcurrencyProbe::default());
    let (pool, rx) = DownloadPool::new(
        PoolConfig::default(),
        JobDeps::new(probe.clone(), Arc::new(StaticCover)),
    );

    let err = pool
        .submit(DownloadRequest::new("", "https://example.com/v"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);

    pool.shutdown().await;
    assert!(collect(rx).await.is_empty());
    assert_eq!(probe.peak.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pool_caps_concurrency_and_finishes_every_job() {
    let dir = TempDir::new().expect("temp dir");
    let probe = Arc::new(ConcurrencyProbe::default());
    let (pool, mut rx) = DownloadPool::new(
        PoolConfig::with_max_concurrent(2),
        JobDeps::new(probe.clone(), Arc::new(StaticCover)),
    );

    let mut registry = JobRegistry::new();
    for i in 0..6 {
        let request = DownloadRequest::new(format!("Track {i}"), "https://example.com/v")
            .with_target_folder(dir.path());
        let id = pool.submit(request.clone()).expect("submit");
        registry.register(id, request);
    }
    assert_eq!(registry.len(), 6);

    let mut catalog = MemoryCatalog::new();
    let mut finished = 0;
    while !registry.is_empty() {
        let event = rx.recv().await.expect("event before all jobs finish");
        if let Some(outcome) = registry.apply(&event) {
            finished += 1;
            if let JobOutcome::Completed(track) = outcome {
                catalog
                    .insert_song(SongRecord::from_completed(&track).expect("record"))
                    .expect("insert");
            }
        }
    }
    pool.shutdown().await;

    assert_eq!(finished, 6);
    assert_eq!(catalog.len(), 6);
    let peak = probe.peak.load(Ordering::SeqCst);
    assert!((1..=2).contains(&peak), "peak concurrency was {peak}");
    assert!(rx.recv().await.is_none());
}
