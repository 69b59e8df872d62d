//! Worker pool: fan-out of line jobs to classification workers.

use std::thread::{self, Scope, ScopedJoinHandle};

use crossbeam_channel::{Receiver, Sender};
use tracing::debug;

use crate::error::PipelineError;
use crate::pipeline::rules::Classifier;
use crate::pipeline::types::{LineJob, Record};

/// Fixed-size set of workers sharing one intake and one outtake queue.
///
/// Workers take whichever job is next on the intake, so records reach the
/// outtake in no particular order. A worker exits once the intake is closed
/// and drained; the outtake closes when the last worker exits.
pub struct WorkerPool<'c> {
    classifier: &'c dyn Classifier,
    size: usize,
}

impl<'c> WorkerPool<'c> {
    pub fn new(classifier: &'c dyn Classifier, size: usize) -> Result<Self, PipelineError> {
        if size == 0 {
            return Err(PipelineError::NoWorkers);
        }
        Ok(Self { classifier, size })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Spawn the workers on `scope`.
    ///
    /// Each handle resolves to the number of jobs that worker classified.
    /// `intake` and `outtake` are consumed so the queues close as soon as the
    /// caller drops its own sender and every worker has finished.
    pub fn spawn<'scope, 'env>(
        &self,
        scope: &'scope Scope<'scope, 'env>,
        intake: Receiver<LineJob>,
        outtake: Sender<Record>,
    ) -> Result<Vec<ScopedJoinHandle<'scope, usize>>, PipelineError>
    where
        'c: 'scope,
    {
        let mut handles = Vec::with_capacity(self.size);
        for id in 0..self.size {
            let classifier = self.classifier;
            let intake = intake.clone();
            let outtake = outtake.clone();
            let handle = thread::Builder::new()
                .name(format!("tokenize-worker-{id}"))
                .spawn_scoped(scope, move || run_worker(id, classifier, intake, outtake))
                .map_err(|source| PipelineError::Spawn {
                    role: format!("worker {id}"),
                    source,
                })?;
            handles.push(handle);
        }
        debug!(workers = self.size, "Worker pool started");
        Ok(handles)
    }
}

fn run_worker(
    id: usize,
    classifier: &dyn Classifier,
    intake: Receiver<LineJob>,
    outtake: Sender<Record>,
) -> usize {
    let mut handled = 0;
    for job in intake.iter() {
        let record = classifier.classify(job.order, &job.raw);
        if outtake.send(record).is_err() {
            // Collector is gone; nobody wants the rest.
            break;
        }
        handled += 1;
    }
    debug!(worker = id, handled, "Worker finished");
    handled
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo(order: usize, line: &str) -> Record {
        Record::new(order, line, false)
    }

    #[test]
    fn zero_workers_is_rejected() {
        assert!(matches!(WorkerPool::new(&echo, 0), Err(PipelineError::NoWorkers)));
    }

    #[test]
    fn every_job_yields_one_record() {
        let pool = WorkerPool::new(&echo, 4).unwrap();
        assert_eq!(pool.size(), 4);

        let (records, handled) = thread::scope(|scope| {
            let (intake_tx, intake_rx) = crossbeam_channel::unbounded();
            let (outtake_tx, outtake_rx) = crossbeam_channel::unbounded();
            let handles = pool.spawn(scope, intake_rx, outtake_tx).unwrap();

            for order in 0..100 {
                intake_tx.send(LineJob::new(order, format!("line {order}"))).unwrap();
            }
            drop(intake_tx);

            let records: Vec<Record> = outtake_rx.iter().collect();
            let handled: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
            (records, handled)
        });

        assert_eq!(handled, 100);
        let mut orders: Vec<usize> = records.iter().map(|r| r.order).collect();
        orders.sort_unstable();
        assert_eq!(orders, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn workers_exit_when_intake_closes_empty() {
        let pool = WorkerPool::new(&echo, 3).unwrap();
        let records: Vec<Record> = thread::scope(|scope| {
            let (intake_tx, intake_rx) = crossbeam_channel::unbounded::<LineJob>();
            let (outtake_tx, outtake_rx) = crossbeam_channel::unbounded();
            pool.spawn(scope, intake_rx, outtake_tx).unwrap();
            drop(intake_tx);
            outtake_rx.iter().collect()
        });
        assert!(records.is_empty());
    }
}
