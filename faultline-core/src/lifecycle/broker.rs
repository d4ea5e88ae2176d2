//! Message broker capabilities
//!
//! The container only needs to open and close broker handles; the client
//! behind them is supplied by the caller. [`ChannelBroker`] is an in-process
//! implementation backed by a tokio channel.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{Resource, ResourceFactory};
use crate::config::FaultlineConfig;
use crate::error::{FaultError, FaultResult};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BrokerMessage {
    pub topic: String,
    pub key: Option<Bytes>,
    pub payload: Bytes,
    pub headers: HashMap<String, String>,
}

impl BrokerMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            ..Self::default()
        }
    }

    pub fn with_key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = Some(key.into());
        self
    }
}

#[async_trait]
pub trait BrokerWriter: Resource {
    async fn send(&self, message: BrokerMessage) -> FaultResult<()>;
}

#[async_trait]
pub trait BrokerReader: Resource {
    /// Next message, or `None` once the reader is closed.
    async fn receive(&self) -> FaultResult<Option<BrokerMessage>>;

    /// Acknowledge a processed message.
    async fn commit(&self, message: &BrokerMessage) -> FaultResult<()>;
}

/// In-process broker. Opens one writer and one reader over a bounded channel.
///
/// Each end is handed to the handle that opens it, so closing the writer
/// ends the channel and the reader sees `None` once it has drained.
pub struct ChannelBroker {
    sender: Mutex<Option<mpsc::Sender<BrokerMessage>>>,
    receiver: Mutex<Option<mpsc::Receiver<BrokerMessage>>>,
}

impl ChannelBroker {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            sender: Mutex::new(Some(sender)),
            receiver: Mutex::new(Some(receiver)),
        }
    }
}

pub struct ChannelWriter {
    sender: Mutex<Option<mpsc::Sender<BrokerMessage>>>,
}

#[async_trait]
impl Resource for ChannelWriter {
    fn name(&self) -> &str {
        "broker-writer"
    }

    async fn close(&self) -> FaultResult<()> {
        self.sender.lock().take();
        Ok(())
    }
}

#[async_trait]
impl BrokerWriter for ChannelWriter {
    async fn send(&self, message: BrokerMessage) -> FaultResult<()> {
        let sender = self
            .sender
            .lock()
            .clone()
            .ok_or_else(|| FaultError::resource("broker-writer", "Writer is closed"))?;
        sender
            .send(message)
            .await
            .map_err(|_| FaultError::resource("broker-writer", "Reader side has gone away"))
    }
}

pub struct ChannelReader {
    receiver: tokio::sync::Mutex<mpsc::Receiver<BrokerMessage>>,
    closed: CancellationToken,
    committed: Mutex<Vec<BrokerMessage>>,
}

impl ChannelReader {
    pub fn committed(&self) -> Vec<BrokerMessage> {
        self.committed.lock().clone()
    }
}

#[async_trait]
impl Resource for ChannelReader {
    fn name(&self) -> &str {
        "broker-reader"
    }

    async fn close(&self) -> FaultResult<()> {
        self.closed.cancel();
        Ok(())
    }
}

#[async_trait]
impl BrokerReader for ChannelReader {
    async fn receive(&self) -> FaultResult<Option<BrokerMessage>> {
        let mut receiver = self.receiver.lock().await;
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Ok(None),
            message = receiver.recv() => Ok(message),
        }
    }

    async fn commit(&self, message: &BrokerMessage) -> FaultResult<()> {
        self.committed.lock().push(message.clone());
        Ok(())
    }
}

#[async_trait]
impl ResourceFactory<dyn BrokerWriter> for ChannelBroker {
    async fn open(&self, _config: &FaultlineConfig) -> FaultResult<Arc<dyn BrokerWriter>> {
        let sender = self
            .sender
            .lock()
            .take()
            .ok_or_else(|| FaultError::resource("broker-writer", "Writer already opened"))?;
        Ok(Arc::new(ChannelWriter {
            sender: Mutex::new(Some(sender)),
        }))
    }
}

#[async_trait]
impl ResourceFactory<dyn BrokerReader> for ChannelBroker {
    async fn open(&self, _config: &FaultlineConfig) -> FaultResult<Arc<dyn BrokerReader>> {
        let receiver = self
            .receiver
            .lock()
            .take()
            .ok_or_else(|| FaultError::resource("broker-reader", "Reader already opened"))?;
        Ok(Arc::new(ChannelReader {
            receiver: tokio::sync::Mutex::new(receiver),
            closed: CancellationToken::new(),
            committed: Mutex::new(Vec::new()),
        }))
    }
}
