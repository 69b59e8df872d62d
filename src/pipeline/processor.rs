//! Tokenizer: runs one document through source → pool → collector.
//!
//! Flow:
//! 1. The line source thread numbers lines and pushes them onto the intake
//! 2. `worker_count` workers classify lines in whatever order they get them
//! 3. The calling thread drains the outtake and sorts by line number
//!
//! A run either returns every line's record in document order or an error;
//! partial output is never returned.

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crossbeam_channel::Sender;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::pipeline::collector::{FanInCollector, order_records};
use crate::pipeline::pool::WorkerPool;
use crate::pipeline::rules::{Classifier, RulesEngine};
use crate::pipeline::source::LineSource;
use crate::pipeline::types::{LineJob, OrderedRecords, Record};

/// Order-preserving concurrent line classifier.
#[derive(Clone)]
pub struct Tokenizer {
    classifier: Arc<dyn Classifier>,
    worker_count: usize,
    cancel: Option<CancellationToken>,
}

impl Tokenizer {
    pub fn new(classifier: Arc<dyn Classifier>, config: &PipelineConfig) -> Self {
        Self {
            classifier,
            worker_count: config.worker_count,
            cancel: None,
        }
    }

    /// Tokenizer using the LaTeX → Markdown rules.
    pub fn latex(config: &PipelineConfig) -> Self {
        Self::new(Arc::new(RulesEngine::latex()), config)
    }

    /// Stop reading input once `token` is cancelled; the run then fails with
    /// [`PipelineError::Cancelled`].
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Tokenize the file at `path`.
    pub fn tokenize_file(&self, path: &Path) -> Result<OrderedRecords, PipelineError> {
        let source = LineSource::open(path)?;
        self.run(source)
    }

    /// Tokenize everything readable from `reader`.
    pub fn tokenize_reader<R: BufRead + Send>(&self, reader: R) -> Result<OrderedRecords, PipelineError> {
        self.run(LineSource::new(reader))
    }

    /// [`tokenize_file`](Self::tokenize_file) on tokio's blocking pool.
    pub async fn tokenize_file_async(&self, path: impl Into<PathBuf>) -> Result<OrderedRecords, PipelineError> {
        let tokenizer = self.clone();
        let path = path.into();
        tokio::task::spawn_blocking(move || tokenizer.tokenize_file(&path))
            .await
            .map_err(|e| PipelineError::Join(e.to_string()))?
    }

    fn run<R: BufRead + Send>(&self, source: LineSource<R>) -> Result<OrderedRecords, PipelineError> {
        let started = Instant::now();
        let pool = WorkerPool::new(self.classifier.as_ref(), self.worker_count)?;
        let cancel = self.cancel.as_ref();

        let (records, produced) = thread::scope(|scope| {
            let (intake_tx, intake_rx) = crossbeam_channel::unbounded::<LineJob>();
            let (outtake_tx, outtake_rx) = crossbeam_channel::unbounded::<Record>();

            let workers = pool.spawn(scope, intake_rx, outtake_tx)?;

            let producer = thread::Builder::new()
                .name("line-source".into())
                .spawn_scoped(scope, move || feed(source, intake_tx, cancel))
                .map_err(|source| PipelineError::Spawn {
                    role: "line source".into(),
                    source,
                })?;

            let records = FanInCollector::new(outtake_rx).drain();

            let mut panicked = None;
            for (worker, handle) in workers.into_iter().enumerate() {
                if handle.join().is_err() {
                    warn!(worker, "Tokenize worker panicked");
                    panicked.get_or_insert(worker);
                }
            }

            let produced = producer.join().map_err(|_| PipelineError::SourcePanicked)??;
            if let Some(worker) = panicked {
                return Err(PipelineError::WorkerPanicked { worker });
            }
            Ok((records, produced))
        })?;

        let ordered = order_records(records, produced)?;
        info!(
            lines = ordered.len(),
            workers = self.worker_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Tokenized input"
        );
        Ok(ordered)
    }
}

/// Push every line onto the intake, returning how many were queued.
///
/// Dropping `intake` on return is what tells the workers no more work is
/// coming.
fn feed<R: BufRead>(
    source: LineSource<R>,
    intake: Sender<LineJob>,
    cancel: Option<&CancellationToken>,
) -> Result<usize, PipelineError> {
    let mut produced = 0;
    for job in source {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(PipelineError::Cancelled);
        }
        if intake.send(job?).is_err() {
            break;
        }
        produced += 1;
    }
    Ok(produced)
}
