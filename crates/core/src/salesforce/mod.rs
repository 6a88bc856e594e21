pub mod auth;
pub mod client;
pub mod executor;
pub mod types;

#[cfg(test)]
pub(crate) mod test_server;

pub use client::SalesforceClient;
pub use executor::{QueryExecutor, QueryOutcome};
pub use types::{QueryPage, RawRecord};

use crate::error::PipelineError;

/// One round trip to the query service.
///
/// `SalesforceClient` is the production implementation; tests substitute an
/// in-memory page source.
#[async_trait::async_trait]
pub trait QueryTransport: Send + Sync {
    async fn first_page(&self, soql: &str) -> Result<QueryPage, PipelineError>;

    async fn next_page(&self, cursor: &str) -> Result<QueryPage, PipelineError>;
}
