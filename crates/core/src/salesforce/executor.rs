use crate::error::PipelineError;
use crate::query::SoqlQuery;
use crate::salesforce::types::RawRecord;
use crate::salesforce::QueryTransport;

#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub soql: String,
    pub records: Vec<RawRecord>,
    pub pages_fetched: usize,
}

/// Runs a query over an authenticated transport and follows continuation
/// cursors until the service stops returning one, or `max_pages` is hit.
#[derive(Debug)]
pub struct QueryExecutor<T> {
    transport: T,
    max_pages: usize,
}

impl<T: QueryTransport> QueryExecutor<T> {
    pub fn new(transport: T, max_pages: usize) -> Self {
        Self {
            transport,
            max_pages: max_pages.max(1),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn max_pages(&self) -> usize {
        self.max_pages
    }

    pub async fn execute(&self, query: &SoqlQuery) -> Result<QueryOutcome, PipelineError> {
        let soql = query.to_soql();
        tracing::debug!(%soql, "submitting query");

        let mut page = self.transport.first_page(&soql).await?;
        let mut pages_fetched = 1;
        let mut records = std::mem::take(&mut page.records);

        while let Some(cursor) = page.cursor().map(str::to_string) {
            if pages_fetched >= self.max_pages {
                return Err(PipelineError::PaginationLimitExceeded {
                    max_pages: self.max_pages,
                });
            }
            tracing::debug!(pages_fetched, %cursor, "fetching next page");
            page = self.transport.next_page(&cursor).await?;
            pages_fetched += 1;
            records.append(&mut page.records);
        }

        tracing::info!(
            rows = records.len(),
            pages_fetched,
            "query completed"
        );

        Ok(QueryOutcome {
            soql,
            records,
            pages_fetched,
        })
    }
}
