use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use serde_json::Value;

use super::client::{truncate_body, HoldedClient, HoldedError};
use super::models::{best_timestamp, item_id};

/// Result of one discovery pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveredIds {
    pub ids: Vec<String>,
    /// The last page read was full when the page cap was reached, so more
    /// changed documents may exist upstream.
    pub page_capped: bool,
}

/// Lists documents changed within a time window. Performs no writes.
#[derive(Clone)]
pub struct ChangedDocumentDiscovery {
    client: HoldedClient,
    page_size: u32,
    max_pages: u32,
}

impl ChangedDocumentDiscovery {
    pub fn new(client: HoldedClient) -> Self {
        let page_size = client.config().page_size.max(1);
        let max_pages = client.config().max_pages.max(1);
        Self {
            client,
            page_size,
            max_pages,
        }
    }

    /// Ids of `doc_type` documents whose best timestamp lies in `[since, until)`,
    /// in upstream order without duplicates.
    ///
    /// The upstream date filter works on whole days and is not trusted to be
    /// exact, so every page is re-filtered locally. Items without any timestamp
    /// are kept.
    pub async fn list_changed(
        &self,
        doc_type: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<DiscoveredIds, HoldedError> {
        if since >= until {
            tracing::info!(%since, %until, "empty discovery window");
            return Ok(DiscoveredIds::default());
        }

        let mut ids: IndexSet<String> = IndexSet::new();
        let mut page_capped = false;

        for page in 1..=self.max_pages {
            let query = [
                ("startDate", since.format("%Y-%m-%d").to_string()),
                ("endDate", until.format("%Y-%m-%d").to_string()),
                ("page", page.to_string()),
                ("limit", self.page_size.to_string()),
            ];
            let body = self.client.list_documents(doc_type, &query).await?;
            let items = match body {
                Value::Array(items) => items,
                Value::Null => Vec::new(),
                other => {
                    return Err(HoldedError::Parse {
                        url: format!("documents/{doc_type}?page={page}"),
                        status: 200,
                        message: "expected a JSON array of documents".to_string(),
                        body: truncate_body(&other.to_string()),
                    })
                }
            };

            let page_len = items.len();
            ids.extend(filter_window(&items, since, until));

            tracing::debug!(page, page_len, kept = ids.len(), "discovery page");

            if page_len < self.page_size as usize {
                break;
            }
            if page == self.max_pages {
                page_capped = true;
                tracing::warn!(
                    max_pages = self.max_pages,
                    "discovery stopped at page cap; remaining documents wait for the next run"
                );
            }
        }

        tracing::info!(count = ids.len(), doc_type, %since, %until, page_capped, "discovered changed documents");
        Ok(DiscoveredIds {
            ids: ids.into_iter().collect(),
            page_capped,
        })
    }
}

/// Keep ids whose best timestamp falls in `[since, until)`; items without a
/// timestamp are kept, items without an id are dropped. Order-preserving, deduped.
pub fn filter_window(items: &[Value], since: DateTime<Utc>, until: DateTime<Utc>) -> Vec<String> {
    let mut out: IndexSet<String> = IndexSet::new();
    for item in items {
        let Some(id) = item_id(item) else {
            continue;
        };
        match best_timestamp(item) {
            Some(ts) if ts < since || ts >= until => continue,
            _ => {
                out.insert(id);
            }
        }
    }
    out.into_iter().collect()
}
