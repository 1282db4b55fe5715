//! Item sinks: bulk persistence backends

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolCopyExt;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::model::ExecutedItem;

/// Bulk write surface for extracted items
///
/// A batch belongs to a single execution; implementations use their
/// highest-throughput path (COPY on Postgres).
#[async_trait]
pub trait ItemSink: Send + Sync {
    async fn write_batch(
        &self,
        execution_id: &str,
        items: Vec<ExecutedItem>,
    ) -> anyhow::Result<()>;
}

/// In-memory sink for tests and dry runs
#[derive(Default)]
pub struct MemoryItemSink {
    items: Mutex<HashMap<String, Vec<ExecutedItem>>>,
}

impl MemoryItemSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn items_for(&self, execution_id: &str) -> Vec<ExecutedItem> {
        self.items
            .lock()
            .await
            .get(execution_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn total(&self) -> usize {
        self.items.lock().await.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl ItemSink for MemoryItemSink {
    async fn write_batch(
        &self,
        execution_id: &str,
        items: Vec<ExecutedItem>,
    ) -> anyhow::Result<()> {
        self.items
            .lock()
            .await
            .entry(execution_id.to_string())
            .or_default()
            .extend(items);
        Ok(())
    }
}

/// Postgres sink using COPY FROM STDIN
pub struct PostgresItemSink {
    pool: PgPool,
    table: String,
}

impl PostgresItemSink {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool, table: "executed_items".to_string() }
    }

    #[must_use]
    pub fn with_table(pool: PgPool, table: impl Into<String>) -> Self {
        Self { pool, table: table.into() }
    }
}

#[async_trait]
impl ItemSink for PostgresItemSink {
    async fn write_batch(
        &self,
        _execution_id: &str,
        items: Vec<ExecutedItem>,
    ) -> anyhow::Result<()> {
        if items.is_empty() {
            return Ok(());
        }

        let statement = format!(
            "COPY {} (execution_id, workflow_id, task_id, url, data, extracted_at) \
             FROM STDIN WITH (FORMAT csv, QUOTE '\"', ESCAPE '\"')",
            self.table
        );

        let mut payload = String::with_capacity(items.len() * 256);
        for item in &items {
            payload.push_str(&csv_row(item)?);
        }

        let mut copy = self.pool.copy_in_raw(&statement).await?;
        copy.send(payload.as_bytes()).await?;
        copy.finish().await?;
        Ok(())
    }
}

fn csv_row(item: &ExecutedItem) -> anyhow::Result<String> {
    let data = serde_json::to_string(&item.data)?;
    Ok(format!(
        "{},{},{},{},{},{}\n",
        csv_field(&item.execution_id),
        csv_field(&item.workflow_id),
        csv_field(&item.task_id),
        csv_field(&item.url),
        csv_field(&data),
        csv_field(&item.extracted_at.to_rfc3339()),
    ))
}

/// Quote a CSV field, doubling embedded quotes
fn csv_field(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_rows_quote_embedded_json() {
        let item = ExecutedItem::new(
            "e1",
            "w1",
            "t1",
            "http://x/a",
            serde_json::json!({"title": "He said \"hi\""}),
        );
        let row = csv_row(&item).expect("row");
        assert!(row.starts_with("\"e1\",\"w1\",\"t1\",\"http://x/a\","));
        // embedded quotes doubled per CSV escaping
        assert!(row.contains(r#"""title"""#));
        assert!(row.ends_with('\n'));
    }

    #[tokio::test]
    async fn memory_sink_groups_by_execution() {
        let sink = MemoryItemSink::new();
        sink.write_batch(
            "e1",
            vec![ExecutedItem::new("e1", "w1", "t1", "http://x/a", serde_json::json!({}))],
        )
        .await
        .expect("write");
        sink.write_batch(
            "e2",
            vec![ExecutedItem::new("e2", "w1", "t2", "http://x/b", serde_json::json!({}))],
        )
        .await
        .expect("write");

        assert_eq!(sink.items_for("e1").await.len(), 1);
        assert_eq!(sink.items_for("e2").await.len(), 1);
        assert_eq!(sink.total().await, 2);
    }
}
