//! Messages handed to user handlers

use std::sync::Arc;

use crate::{Row, Table, TargetSchemaRef};

/// Error type user handlers may return
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// User callback invoked synchronously on the delivery thread owning the topic
///
/// Uses `Arc` so one handler can be shared by several subscriptions.
pub type MessageHandler = Arc<dyn Fn(Delivery) -> Result<(), HandlerError> + Send + Sync>;

/// Wrap an infallible closure as a `MessageHandler`
pub fn handler_fn<F>(f: F) -> MessageHandler
where
    F: Fn(Delivery) + Send + Sync + 'static,
{
    Arc::new(move |delivery| {
        f(delivery);
        Ok(())
    })
}

/// Payload shape of one handler call
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// A single row (no buffering, column-list shape)
    Row(Row),

    /// Several rows (buffered, column-list shape)
    Rows(Vec<Row>),

    /// Tabular shape (`msg_as_table`)
    Table(Table),
}

impl Message {
    /// Number of rows carried
    pub fn len(&self) -> usize {
        match self {
            Message::Row(_) => 1,
            Message::Rows(rows) => rows.len(),
            Message::Table(table) => table.num_rows(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flatten into rows regardless of shape
    pub fn into_rows(self) -> Vec<Row> {
        match self {
            Message::Row(row) => vec![row],
            Message::Rows(rows) => rows,
            Message::Table(table) => table.rows,
        }
    }
}

/// One handler invocation
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Canonical topic string
    pub topic: Arc<str>,

    /// Discriminator of the sub-stream, when demultiplexed
    pub tag: Option<String>,

    /// Target schema of the sub-stream, when demultiplexed
    pub schema: Option<TargetSchemaRef>,

    /// Payload
    pub message: Message,
}
