//! Single-operation command sender. Stateless; the only seam for
//! swapping broker implementations, per spec.md §4.6.

use std::sync::Arc;

use stationbus_proto::Message;
use thiserror::Error;

use crate::broker::{Broker, BrokerError};

#[derive(Debug, Error)]
pub enum SendError {
    #[error("failed to encode message: {0}")]
    Encode(#[from] stationbus_proto::ProtoError),
    #[error("broker publish failed: {0}")]
    Publish(#[from] BrokerError),
}

pub struct CommandSender {
    broker: Arc<dyn Broker>,
}

impl CommandSender {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    pub async fn send(&self, channel: &str, message: &Message) -> Result<(), SendError> {
        let bytes = message.to_json()?;
        self.broker.publish(channel, bytes).await?;
        Ok(())
    }
}
