//! AMQP queue transport backed by lapin.
//!
//! Intended for distributed deployments where workers run on several
//! hosts. Durability knobs map onto per-queue arguments understood by
//! RabbitMQ quorum queues: `x-message-ttl` for expiry and
//! `x-delivery-limit` for the delivery cap. Polling uses `basic_get`, so
//! the broker only reports a redelivered flag rather than an exact
//! delivery count; the delivery-limit argument enforces the cap
//! broker-side.

use std::time::Duration;

use async_trait::async_trait;
use lapin::options::{
    BasicAckOptions, BasicGetOptions, BasicNackOptions, BasicPublishOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tokio::time::Instant;

use super::{QueueError, QueueMessage, QueueSettings, QueueTransport, ReceiptHandle};

/// Sleep between empty `basic_get` polls inside a bounded-wait receive.
const RECEIVE_POLL_SLEEP: Duration = Duration::from_millis(200);

fn unavailable(err: lapin::Error) -> QueueError {
    QueueError::Unavailable(err.to_string())
}

/// Queue transport speaking AMQP 0.9.1.
pub struct AmqpTransport {
    connection: Connection,
    channel: Channel,
    settings: QueueSettings,
}

impl AmqpTransport {
    /// Connect to the broker and open a channel.
    pub async fn connect(url: &str, settings: QueueSettings) -> Result<Self, QueueError> {
        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(unavailable)?;
        let channel = connection.create_channel().await.map_err(unavailable)?;
        Ok(Self {
            connection,
            channel,
            settings,
        })
    }
}

#[async_trait]
impl QueueTransport for AmqpTransport {
    async fn ensure_queue(&self, queue: &str) -> Result<(), QueueError> {
        let mut arguments = FieldTable::default();
        arguments.insert(
            ShortString::from("x-message-ttl"),
            AMQPValue::LongLongInt(self.settings.message_ttl.as_millis() as i64),
        );
        arguments.insert(
            ShortString::from("x-delivery-limit"),
            AMQPValue::LongInt(self.settings.max_delivery_count as i32),
        );
        self.channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                arguments,
            )
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn publish(&self, queue: &str, body: &str) -> Result<(), QueueError> {
        self.channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                body.as_bytes(),
                BasicProperties::default(),
            )
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn receive(
        &self,
        queue: &str,
        max_count: usize,
        max_wait: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let deadline = Instant::now() + max_wait;
        let mut received = Vec::new();
        loop {
            let message = self
                .channel
                .basic_get(queue, BasicGetOptions { no_ack: false })
                .await
                .map_err(unavailable)?;
            match message {
                Some(message) => {
                    let delivery = message.delivery;
                    let body = String::from_utf8(delivery.data).map_err(|err| {
                        QueueError::Malformed(format!("non-utf8 message body: {err}"))
                    })?;
                    received.push(QueueMessage {
                        body,
                        receipt: ReceiptHandle {
                            queue: queue.to_string(),
                            id: delivery.delivery_tag,
                        },
                        delivery_count: if delivery.redelivered { 2 } else { 1 },
                    });
                    if received.len() >= max_count {
                        return Ok(received);
                    }
                }
                None => {
                    if !received.is_empty() || Instant::now() >= deadline {
                        return Ok(received);
                    }
                    tokio::time::sleep(RECEIVE_POLL_SLEEP).await;
                }
            }
        }
    }

    async fn complete(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        self.channel
            .basic_ack(receipt.id, BasicAckOptions::default())
            .await
            .map_err(unavailable)
    }

    async fn abandon(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        self.channel
            .basic_nack(
                receipt.id,
                BasicNackOptions {
                    requeue: true,
                    ..Default::default()
                },
            )
            .await
            .map_err(unavailable)
    }

    async fn check_connection(&self) -> Result<(), QueueError> {
        if self.connection.status().connected() {
            Ok(())
        } else {
            Err(QueueError::Unavailable(
                "amqp connection closed".to_string(),
            ))
        }
    }
}
