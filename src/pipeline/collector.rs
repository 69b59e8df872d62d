//! Fan-in collector: gathers worker output and restores document order.

use crossbeam_channel::Receiver;
use tracing::debug;

use crate::error::PipelineError;
use crate::pipeline::types::{OrderedRecords, Record};

/// Drains the outtake queue of a worker pool.
pub struct FanInCollector {
    outtake: Receiver<Record>,
}

impl FanInCollector {
    pub fn new(outtake: Receiver<Record>) -> Self {
        Self { outtake }
    }

    /// Block until every sender on the outtake is gone, returning records in
    /// arrival order.
    pub fn drain(self) -> Vec<Record> {
        let records: Vec<Record> = self.outtake.iter().collect();
        debug!(records = records.len(), "Outtake drained");
        records
    }
}

/// Sort `records` by `order` and check they cover `0..expected` exactly once.
pub fn order_records(mut records: Vec<Record>, expected: usize) -> Result<OrderedRecords, PipelineError> {
    if records.len() != expected {
        return Err(PipelineError::Incomplete {
            expected,
            received: records.len(),
        });
    }

    records.sort_unstable_by_key(|r| r.order);

    if let Some((index, record)) = records.iter().enumerate().find(|(i, r)| r.order != *i) {
        return Err(PipelineError::OrderGap {
            order: record.order,
            expected: index,
        });
    }

    Ok(OrderedRecords::from_sorted(records))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(order: usize) -> Record {
        Record::new(order, format!("r{order}"), false)
    }

    #[test]
    fn sorts_shuffled_records() {
        let ordered = order_records(vec![record(2), record(0), record(3), record(1)], 4).unwrap();
        let orders: Vec<usize> = ordered.iter().map(|r| r.order).collect();
        assert_eq!(orders, vec![0, 1, 2, 3]);
        assert_eq!(ordered.as_slice()[2].data, "r2");
    }

    #[test]
    fn missing_record_is_reported() {
        let err = order_records(vec![record(0), record(2)], 3).unwrap_err();
        assert!(matches!(err, PipelineError::Incomplete { expected: 3, received: 2 }));
    }

    #[test]
    fn duplicate_record_is_reported() {
        let err = order_records(vec![record(0), record(0), record(2)], 3).unwrap_err();
        assert!(matches!(err, PipelineError::OrderGap { order: 0, expected: 1 }));
    }

    #[test]
    fn empty_input_is_empty_sequence() {
        assert!(order_records(Vec::new(), 0).unwrap().is_empty());
    }

    #[test]
    fn drain_ends_when_senders_drop() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let producer = std::thread::spawn(move || {
            for order in (0..10).rev() {
                tx.send(record(order)).unwrap();
            }
        });
        let records = FanInCollector::new(rx).drain();
        producer.join().unwrap();
        assert_eq!(records.len(), 10);
        assert_eq!(records[0].order, 9);
    }
}
