//! Shared test doubles for the integration tests.

#![allow(dead_code)]

use edgequake_heic::{
    ConversionStrategy, ConverterConfig, HeicConverter, OutputLayout, Pipeline, StrategyError,
    WorkerPool,
};
use futures::future::{BoxFuture, FutureExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Bytes the stub writes as its "JPEG".
pub const STUB_JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0xFF, 0xD9];

/// Sources whose file name contains this marker make the stub panic.
pub const CRASH_MARKER: &str = "crash";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    Succeed,
    Fail,
}

/// Instrumented strategy: counts calls, tracks concurrency, records the
/// order in which sources were started.
pub struct StubStrategy {
    name: &'static str,
    behaviour: Behaviour,
    delay: Duration,
    bytes: Vec<u8>,
    pub calls: AtomicUsize,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub started: Mutex<Vec<PathBuf>>,
}

impl StubStrategy {
    pub fn new(behaviour: Behaviour, delay: Duration) -> Arc<Self> {
        Self::named("stub", behaviour, delay, STUB_JPEG.to_vec())
    }

    pub fn named(
        name: &'static str,
        behaviour: Behaviour,
        delay: Duration,
        bytes: Vec<u8>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            behaviour,
            delay,
            bytes,
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            started: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> Vec<PathBuf> {
        self.started.lock().unwrap().clone()
    }
}

impl ConversionStrategy for StubStrategy {
    fn name(&self) -> &'static str {
        self.name
    }

    fn convert<'a>(
        &'a self,
        source: &'a Path,
        output: &'a Path,
    ) -> BoxFuture<'a, Result<(), StrategyError>> {
        async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            self.started.lock().unwrap().push(source.to_path_buf());

            tokio::time::sleep(self.delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            let name = source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if name.contains(CRASH_MARKER) {
                panic!("stub crashed on {name}");
            }

            match self.behaviour {
                Behaviour::Succeed => {
                    tokio::fs::write(output, &self.bytes)
                        .await
                        .map_err(|e| StrategyError::Failed {
                            strategy: self.name.into(),
                            detail: e.to_string(),
                        })
                }
                Behaviour::Fail => Err(StrategyError::Failed {
                    strategy: self.name.into(),
                    detail: "stub failure".into(),
                }),
            }
        }
        .boxed()
    }
}

/// Write a fake HEIC source (content is irrelevant to the stub).
pub fn heic_fixture(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"\x00\x00\x00\x18ftypheic").unwrap();
    path
}

pub fn config(dir: &Path, workers: usize) -> ConverterConfig {
    ConverterConfig::builder()
        .work_dir(dir.join("work"))
        .workers(workers)
        .build()
        .unwrap()
}

pub fn converter(dir: &Path, workers: usize, stub: Arc<StubStrategy>) -> HeicConverter {
    HeicConverter::with_pipeline(config(dir, workers), Pipeline::new(vec![stub]))
}

pub fn pool(dir: &Path, workers: usize, stub: Arc<StubStrategy>) -> WorkerPool {
    let cfg = config(dir, workers);
    WorkerPool::new(
        Arc::new(Pipeline::new(vec![stub])),
        OutputLayout::new(&cfg.work_dir),
        &cfg,
    )
}
