//! Connector lifecycle trait.

use async_trait::async_trait;

use crate::error::Result;
use crate::record::SinkRecord;

/// Trait that sink connectors implement.
///
/// A sink connector consumes records from topics and writes them to an
/// external system.
#[async_trait]
pub trait SinkConnector: Send + Sync {
    /// Initialize the connector.
    async fn start(&mut self) -> Result<()>;

    /// Accept a batch of records for writing.
    ///
    /// Implementations may buffer records internally and defer the actual
    /// write until [`flush`](SinkConnector::flush) is called.
    async fn put(&mut self, records: &[SinkRecord]) -> Result<()>;

    /// Surface the outcome of buffered work to the caller.
    async fn flush(&mut self) -> Result<()>;

    /// Gracefully shut down the connector, flushing remaining data.
    async fn stop(&mut self) -> Result<()>;

    /// Return the unique name of this connector instance.
    fn name(&self) -> &str;
}
