//! Concurrent, order-preserving tokenization pipeline.
//!
//! Every input line flows through:
//! 1. `LineSource`: numbers lines as they are read
//! 2. `WorkerPool`: classifies lines concurrently via a `Classifier`
//! 3. `FanInCollector`: gathers records and restores line order
//!
//! `Tokenizer` wires the three together for one document.

pub mod collector;
pub mod pool;
pub mod processor;
pub mod rules;
pub mod source;
pub mod types;

pub use collector::FanInCollector;
pub use pool::WorkerPool;
pub use processor::Tokenizer;
pub use rules::{Classifier, RuleAction, RulesEngine};
pub use source::LineSource;
pub use types::{LineJob, OrderedRecords, Record};
