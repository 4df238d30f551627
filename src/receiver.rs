// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Inbound Operation Bridge
//!
//! The [`Receiver`] adapts the broker's push-based delivery feed into
//! pull-driven sequential consumption. Each `consume*` call opens an
//! independent subscription on its own consumer tag; within one subscription
//! deliveries are processed strictly in arrival order, with at most one
//! handler invocation in flight at a time.
//!
//! Two acknowledgement disciplines are supported. Auto-ack subscriptions tell
//! the broker a delivery is settled before the caller ever sees it, so a
//! failing caller does not cause redelivery. Manual-ack subscriptions wrap
//! every delivery in an [`AcknowledgeHandler`] that must be acked or rejected
//! explicitly; a delivery that is neither stays outstanding at the broker,
//! and the bridge never times it out.

use crate::{errors::AmqpError, message::InboundDelivery, otel, plugin::PluginRegistry};
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use lapin::{
    message::Delivery,
    options::{
        BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
        BasicQosOptions,
    },
    protocol::constants::REPLY_SUCCESS,
    types::FieldTable,
    BasicProperties, Channel, Consumer,
};
use opentelemetry::{
    global,
    trace::{Span, Status},
};
use std::{
    borrow::Cow,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    task::{Context as TaskContext, Poll},
};
use tracing::{debug, error};
use uuid::Uuid;

/// Handler invoked for every delivery of an auto-ack subscription.
#[async_trait]
pub trait AutoAckHandler: Send + Sync {
    async fn handle(&self, delivery: InboundDelivery) -> Result<(), AmqpError>;
}

/// Handler invoked for every delivery of a manual-ack subscription.
///
/// The handler owns the acknowledgement: it must call
/// [`AcknowledgeHandler::ack`] or [`AcknowledgeHandler::reject`] exactly once
/// per delivery. Returning without doing either leaves the delivery
/// outstanding at the broker.
#[async_trait]
pub trait ManualAckHandler: Send + Sync {
    async fn handle(&self, delivery: AcknowledgeHandler) -> Result<(), AmqpError>;
}

/// Guard making the two terminal actions of a delivery mutually exclusive
/// and single-shot.
#[derive(Debug, Default)]
struct AckGuard(AtomicBool);

impl AckGuard {
    fn consume(&self) -> Result<(), AmqpError> {
        if self.0.swap(true, Ordering::SeqCst) {
            Err(AmqpError::AlreadyAcknowledged)
        } else {
            Ok(())
        }
    }
}

/// A delivery awaiting its manual acknowledgement.
///
/// Exposes exactly two terminal actions, ack and reject. The first call wins;
/// any further terminal call fails locally with
/// [`AmqpError::AlreadyAcknowledged`] and never reaches the broker.
#[derive(Debug)]
pub struct AcknowledgeHandler {
    delivery: Delivery,
    guard: AckGuard,
}

impl AcknowledgeHandler {
    pub(crate) fn new(delivery: Delivery) -> Self {
        AcknowledgeHandler {
            delivery,
            guard: AckGuard::default(),
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.delivery.data
    }

    pub fn exchange(&self) -> &str {
        self.delivery.exchange.as_str()
    }

    pub fn routing_key(&self) -> &str {
        self.delivery.routing_key.as_str()
    }

    pub fn redelivered(&self) -> bool {
        self.delivery.redelivered
    }

    pub fn properties(&self) -> &BasicProperties {
        &self.delivery.properties
    }

    /// Acknowledges the delivery.
    ///
    /// With `multiple` set, all prior unacknowledged deliveries on the same
    /// channel up to and including this one are acknowledged as well.
    pub async fn ack(&self, multiple: bool) -> Result<(), AmqpError> {
        self.guard.consume()?;

        self.delivery
            .ack(BasicAckOptions { multiple })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling ack msg");
                AmqpError::from_lapin("basic.ack", err)
            })
    }

    /// Rejects the delivery.
    ///
    /// With `multiple` set, all prior unacknowledged deliveries on the same
    /// channel up to and including this one are rejected as well. With
    /// `requeue` set, the broker makes the message eligible for redelivery;
    /// without it, the message is dropped or dead-lettered per queue policy.
    pub async fn reject(&self, multiple: bool, requeue: bool) -> Result<(), AmqpError> {
        self.guard.consume()?;

        self.delivery
            .nack(BasicNackOptions { multiple, requeue })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling nack msg");
                AmqpError::from_lapin("basic.nack", err)
            })
    }
}

/// An open auto-ack subscription, yielding deliveries in arrival order.
pub struct Subscription {
    channel: Arc<Channel>,
    consumer_tag: String,
    consumer: Consumer,
}

impl Subscription {
    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    /// Cancels the subscription.
    ///
    /// No further deliveries are yielded once the broker processed the
    /// cancellation; the stream then terminates.
    pub async fn cancel(&self) -> Result<(), AmqpError> {
        debug!(consumer_tag = self.consumer_tag.as_str(), "cancelling subscription");

        self.channel
            .basic_cancel(&self.consumer_tag, BasicCancelOptions::default())
            .await
            .map_err(|err| AmqpError::from_lapin("basic.cancel", err))
    }
}

impl Stream for Subscription {
    type Item = Result<InboundDelivery, AmqpError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.consumer).poll_next(cx) {
            Poll::Ready(Some(Ok(delivery))) => {
                Poll::Ready(Some(Ok(InboundDelivery::from(delivery))))
            }
            Poll::Ready(Some(Err(err))) => {
                Poll::Ready(Some(Err(AmqpError::from_lapin("basic.consume", err))))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// An open manual-ack subscription, yielding acknowledgement handles in
/// arrival order.
pub struct AckSubscription {
    channel: Arc<Channel>,
    consumer_tag: String,
    consumer: Consumer,
}

impl AckSubscription {
    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    /// Cancels the subscription.
    ///
    /// Deliveries already in flight keep their acknowledgement handles; they
    /// can still be acked or rejected after the cancellation.
    pub async fn cancel(&self) -> Result<(), AmqpError> {
        debug!(consumer_tag = self.consumer_tag.as_str(), "cancelling subscription");

        self.channel
            .basic_cancel(&self.consumer_tag, BasicCancelOptions::default())
            .await
            .map_err(|err| AmqpError::from_lapin("basic.cancel", err))
    }
}

impl Stream for AckSubscription {
    type Item = Result<AcknowledgeHandler, AmqpError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.consumer).poll_next(cx) {
            Poll::Ready(Some(Ok(delivery))) => {
                Poll::Ready(Some(Ok(AcknowledgeHandler::new(delivery))))
            }
            Poll::Ready(Some(Err(err))) => {
                Poll::Ready(Some(Err(AmqpError::from_lapin("basic.consume", err))))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Inbound bridge bound to one channel of the shared connection.
#[derive(Debug, Clone)]
pub struct Receiver {
    channel: Arc<Channel>,
    plugins: Arc<PluginRegistry>,
}

impl Receiver {
    pub(crate) fn new(channel: Arc<Channel>, plugins: Arc<PluginRegistry>) -> Self {
        Receiver { channel, plugins }
    }

    pub(crate) fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    /// Bounds how many unacknowledged deliveries the broker pushes ahead of
    /// consumption on this bridge's channel.
    pub async fn qos(&self, prefetch_count: u16) -> Result<(), AmqpError> {
        self.channel
            .basic_qos(prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "failure to configure qos");
                AmqpError::from_lapin("basic.qos", err)
            })
    }

    /// Opens an auto-ack subscription on `queue`.
    ///
    /// Every delivery is settled broker-side before it is yielded, so a
    /// caller that fails while processing it does not cause redelivery.
    pub async fn consume_auto_ack(&self, queue: &str) -> Result<Subscription, AmqpError> {
        let (consumer, consumer_tag) = self.open_subscription(queue, true).await?;

        Ok(Subscription {
            channel: self.channel.clone(),
            consumer_tag,
            consumer,
        })
    }

    /// Consumes `queue` in auto-ack mode, invoking `handler` for every
    /// delivery in arrival order, one at a time.
    ///
    /// Handler failures are logged and do not stop consumption; a
    /// subscription-level error terminates the loop with that error. The call
    /// returns `Ok` when the subscription ends (cancellation or bridge
    /// close).
    pub async fn consume_auto_ack_with(
        &self,
        queue: &str,
        handler: Arc<dyn AutoAckHandler>,
    ) -> Result<(), AmqpError> {
        let mut subscription = self.consume_auto_ack(queue).await?;
        let tracer = global::tracer("amqp consumer");

        while let Some(item) = subscription.next().await {
            let delivery = item?;

            let (_ctx, mut span) =
                otel::consumer_span(delivery.properties(), &tracer, delivery.routing_key());

            match handler.handle(delivery).await {
                Ok(()) => span.set_status(Status::Ok),
                Err(err) => {
                    error!(error = err.to_string(), "error consume msg");
                    span.record_error(&err);
                    span.set_status(Status::Error {
                        description: Cow::from("handler failed"),
                    });
                }
            }
        }

        Ok(())
    }

    /// Opens a manual-ack subscription on `queue`.
    ///
    /// The caller must ack or reject every yielded delivery; deliveries left
    /// unacknowledged stay outstanding from the broker's perspective.
    pub async fn consume(&self, queue: &str) -> Result<AckSubscription, AmqpError> {
        let (consumer, consumer_tag) = self.open_subscription(queue, false).await?;

        Ok(AckSubscription {
            channel: self.channel.clone(),
            consumer_tag,
            consumer,
        })
    }

    /// Consumes `queue` in manual-ack mode, invoking `handler` for every
    /// delivery in arrival order, one at a time.
    ///
    /// The handler receives the acknowledgement handle and is responsible for
    /// acking or rejecting before it returns. Handler failures are logged and
    /// do not stop consumption.
    pub async fn consume_with(
        &self,
        queue: &str,
        handler: Arc<dyn ManualAckHandler>,
    ) -> Result<(), AmqpError> {
        let mut subscription = self.consume(queue).await?;
        let tracer = global::tracer("amqp consumer");

        while let Some(item) = subscription.next().await {
            let delivery = item?;

            let (_ctx, mut span) =
                otel::consumer_span(delivery.properties(), &tracer, delivery.routing_key());

            match handler.handle(delivery).await {
                Ok(()) => span.set_status(Status::Ok),
                Err(err) => {
                    error!(error = err.to_string(), "error consume msg");
                    span.record_error(&err);
                    span.set_status(Status::Error {
                        description: Cow::from("handler failed"),
                    });
                }
            }
        }

        Ok(())
    }

    /// Escape hatch: the raw lapin channel underneath this bridge.
    pub fn as_channel(&self) -> Arc<Channel> {
        self.channel.clone()
    }

    /// Closes the underlying channel.
    pub async fn close(&self) -> Result<(), AmqpError> {
        self.channel
            .close(REPLY_SUCCESS, "closing receiver")
            .await
            .map_err(|err| AmqpError::from_lapin("channel.close", err))
    }

    async fn open_subscription(
        &self,
        queue: &str,
        no_ack: bool,
    ) -> Result<(Consumer, String), AmqpError> {
        let consumer_tag = format!("ctag-{}", Uuid::new_v4());

        debug!(
            queue = queue,
            consumer_tag = consumer_tag.as_str(),
            "opening subscription"
        );

        let consumer = self
            .channel
            .basic_consume(
                queue,
                &consumer_tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to create the consumer");
                AmqpError::from_lapin("basic.consume", err)
            })?;

        Ok((consumer, consumer_tag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_actions_are_single_shot() {
        let guard = AckGuard::default();

        assert!(guard.consume().is_ok());
        assert_eq!(guard.consume(), Err(AmqpError::AlreadyAcknowledged));
        assert_eq!(guard.consume(), Err(AmqpError::AlreadyAcknowledged));
    }
}
