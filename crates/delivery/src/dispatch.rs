//! Handler dispatch boundary
//!
//! User code runs synchronously on the delivery thread. Errors and panics
//! are caught here, logged with topic context and counted; they never stop
//! the thread.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use contracts::{Delivery, Message, MessageHandler, StreamError, TargetSchemaRef};
use tracing::{error, trace};

use crate::batcher::FlushTrigger;
use crate::gate::DeliveryGate;
use crate::metrics::TopicMetrics;

/// Invoke `handler`, converting a returned error or a panic into `StreamError::Handler`
pub fn invoke(handler: &MessageHandler, delivery: Delivery) -> Result<(), StreamError> {
    let topic = delivery.topic.clone();
    match panic::catch_unwind(AssertUnwindSafe(|| handler(delivery))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(StreamError::handler(topic.as_ref(), e.to_string())),
        Err(payload) => Err(StreamError::handler(
            topic.as_ref(),
            format!("handler panicked: {}", panic_message(payload.as_ref())),
        )),
    }
}

/// Readable text of a caught panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

/// Delivers flushed batches of one topic to its handler
#[derive(Clone)]
pub struct TopicDispatcher {
    topic: Arc<str>,
    handler: MessageHandler,
    metrics: Arc<TopicMetrics>,
    /// Closed by unsubscribe; every call is admitted through it
    gate: Arc<DeliveryGate>,
}

impl TopicDispatcher {
    pub fn new(
        topic: Arc<str>,
        handler: MessageHandler,
        metrics: Arc<TopicMetrics>,
        gate: Arc<DeliveryGate>,
    ) -> Self {
        Self {
            topic,
            handler,
            metrics,
            gate,
        }
    }

    pub fn topic(&self) -> &Arc<str> {
        &self.topic
    }

    pub fn is_active(&self) -> bool {
        self.gate.is_open()
    }

    /// Hand one message to the handler
    ///
    /// Returns false when the subscription is no longer active (nothing was
    /// called) or the handler failed. The gate pass is held for the whole call.
    pub fn deliver(
        &self,
        tag: Option<&str>,
        schema: Option<&TargetSchemaRef>,
        message: Message,
        trigger: FlushTrigger,
    ) -> bool {
        let Some(_pass) = self.gate.admit() else {
            return false;
        };

        let rows = message.len();
        let delivery = Delivery {
            topic: self.topic.clone(),
            tag: tag.map(str::to_string),
            schema: schema.cloned(),
            message,
        };

        let started = Instant::now();
        let result = invoke(&self.handler, delivery);
        observability::record_handler_latency_ms(
            &self.topic,
            started.elapsed().as_secs_f64() * 1000.0,
        );
        observability::record_flush(&self.topic, trigger.as_str());

        match result {
            Ok(()) => {
                self.metrics.add_delivered(rows);
                observability::record_handler_call(&self.topic, rows, true);
                trace!(topic = %self.topic, tag = ?tag, rows, trigger = trigger.as_str(), "delivered");
                true
            }
            Err(e) => {
                self.metrics.inc_handler_failures();
                observability::record_handler_call(&self.topic, rows, false);
                error!(topic = %self.topic, tag = ?tag, rows, error = %e, "handler failed");
                // Continue with the next batch
                false
            }
        }
    }
}
