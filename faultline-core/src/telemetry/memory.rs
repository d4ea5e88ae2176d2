//! In-process telemetry sink
//!
//! Records every event and transaction in memory. Used by tests and handy
//! for local runs where no collector is available.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{ErrorEvent, TelemetrySink, Transaction};
use crate::error::{FaultError, FaultResult};
use crate::lifecycle::Resource;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    pub name: String,
    pub finished: bool,
}

#[derive(Debug, Default)]
pub struct MemoryTelemetry {
    events: Mutex<Vec<ErrorEvent>>,
    transactions: Arc<Mutex<Vec<TransactionRecord>>>,
    fail_reports: AtomicBool,
    flushed: AtomicBool,
}

impl MemoryTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ErrorEvent> {
        self.events.lock().clone()
    }

    pub fn transactions(&self) -> Vec<TransactionRecord> {
        self.transactions.lock().clone()
    }

    /// Make subsequent reports fail, simulating an unreachable backend.
    pub fn fail_reports(&self, fail: bool) {
        self.fail_reports.store(fail, Ordering::SeqCst);
    }

    pub fn was_flushed(&self) -> bool {
        self.flushed.load(Ordering::SeqCst)
    }
}

struct MemoryTransaction {
    name: String,
    index: usize,
    log: Arc<Mutex<Vec<TransactionRecord>>>,
}

impl Transaction for MemoryTransaction {
    fn name(&self) -> &str {
        &self.name
    }

    fn finish(self: Box<Self>) {
        if let Some(record) = self.log.lock().get_mut(self.index) {
            record.finished = true;
        }
    }
}

#[async_trait]
impl Resource for MemoryTelemetry {
    fn name(&self) -> &str {
        "memory-telemetry"
    }

    async fn close(&self) -> FaultResult<()> {
        self.flush(Duration::ZERO).await;
        Ok(())
    }
}

#[async_trait]
impl TelemetrySink for MemoryTelemetry {
    fn report(&self, event: ErrorEvent) -> FaultResult<()> {
        if self.fail_reports.load(Ordering::SeqCst) {
            return Err(FaultError::Telemetry {
                message: "memory sink rejected event".to_string(),
            });
        }
        self.events.lock().push(event);
        Ok(())
    }

    fn start_transaction(&self, name: &str) -> Box<dyn Transaction> {
        let mut log = self.transactions.lock();
        log.push(TransactionRecord {
            name: name.to_string(),
            finished: false,
        });
        Box::new(MemoryTransaction {
            name: name.to_string(),
            index: log.len() - 1,
            log: self.transactions.clone(),
        })
    }

    async fn flush(&self, _timeout: Duration) -> bool {
        self.flushed.store(true, Ordering::SeqCst);
        true
    }
}
