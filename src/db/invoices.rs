use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

use super::error::{StoreError, StoreResult};
use super::repositories::{InvoiceStore, WritePlan};
use crate::models::{
    InvoiceItemRecord, InvoiceRecord, Provenance, StoredInvoice, StoredInvoiceItem,
};

const INVOICE_COLUMNS: &str = "id, source_provider, external_invoice_id, invoice_number, invoice_date, \
     currency, total_net, total_vat, total_gross, source_month, state_code, needs_review, \
     client_name, external_modified_at, source_meta, created_at, updated_at";

#[derive(Clone)]
pub struct PgInvoiceStore {
    pool: PgPool,
}

impl PgInvoiceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_invoice(row: PgRow) -> StoreResult<StoredInvoice> {
        let state_code: String = row.try_get("state_code")?;
        let Json(source_meta): Json<Provenance> = row.try_get("source_meta")?;
        Ok(StoredInvoice {
            id: row.try_get("id")?,
            record: InvoiceRecord {
                source_provider: row.try_get("source_provider")?,
                external_invoice_id: row.try_get("external_invoice_id")?,
                invoice_number: row.try_get("invoice_number")?,
                invoice_date: row.try_get("invoice_date")?,
                currency: row.try_get("currency")?,
                total_net: row.try_get("total_net")?,
                total_vat: row.try_get("total_vat")?,
                total_gross: row.try_get("total_gross")?,
                source_month: row.try_get("source_month")?,
                state_code: state_code.parse().map_err(StoreError::Corrupt)?,
                needs_review: row.try_get("needs_review")?,
                client_name: row.try_get("client_name")?,
                external_modified_at: row.try_get("external_modified_at")?,
                source_meta,
            },
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn map_item(row: PgRow) -> StoreResult<StoredInvoiceItem> {
        let line_type: String = row.try_get("line_type")?;
        let state_code: String = row.try_get("state_code")?;
        Ok(StoredInvoiceItem {
            id: row.try_get("id")?,
            invoice_id: row.try_get("invoice_id")?,
            item: InvoiceItemRecord {
                description: row.try_get("description")?,
                units: row.try_get("units")?,
                unit_net_price: row.try_get("unit_net_price")?,
                line_net_amount: row.try_get("line_net_amount")?,
                vat_rate: row.try_get("vat_rate")?,
                line_vat_amount: row.try_get("line_vat_amount")?,
                line_gross_amount: row.try_get("line_gross_amount")?,
                line_type: line_type.parse().map_err(StoreError::Corrupt)?,
                state_code: state_code.parse().map_err(StoreError::Corrupt)?,
            },
        })
    }

    async fn find_one(&self, provider: &str, column: &str, value: &str) -> StoreResult<Option<StoredInvoice>> {
        let sql = format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE source_provider = $1 AND {column} = $2"
        );
        let row = sqlx::query(&sql)
            .bind(provider)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::map_invoice).transpose()
    }
}

#[async_trait]
impl InvoiceStore for PgInvoiceStore {
    async fn find_by_external_id(
        &self,
        provider: &str,
        external_id: &str,
    ) -> StoreResult<Option<StoredInvoice>> {
        self.find_one(provider, "external_invoice_id", external_id).await
    }

    async fn find_by_invoice_number(
        &self,
        provider: &str,
        invoice_number: &str,
    ) -> StoreResult<Option<StoredInvoice>> {
        self.find_one(provider, "invoice_number", invoice_number).await
    }

    async fn write_invoice(
        &self,
        plan: WritePlan,
        record: &InvoiceRecord,
        items: &[InvoiceItemRecord],
    ) -> StoreResult<i64> {
        let mut tx = self.pool.begin().await?;

        let invoice_id: i64 = match plan {
            WritePlan::Insert => {
                sqlx::query_scalar(
                    r#"
                    INSERT INTO invoices (
                        source_provider, external_invoice_id, invoice_number, invoice_date,
                        currency, total_net, total_vat, total_gross, source_month,
                        state_code, needs_review, client_name, external_modified_at, source_meta
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                    RETURNING id
                    "#,
                )
                .bind(&record.source_provider)
                .bind(&record.external_invoice_id)
                .bind(&record.invoice_number)
                .bind(record.invoice_date)
                .bind(&record.currency)
                .bind(&record.total_net)
                .bind(&record.total_vat)
                .bind(&record.total_gross)
                .bind(&record.source_month)
                .bind(record.state_code.as_str())
                .bind(record.needs_review)
                .bind(&record.client_name)
                .bind(record.external_modified_at)
                .bind(Json(&record.source_meta))
                .fetch_one(&mut *tx)
                .await?
            }
            WritePlan::Update { invoice_id } => {
                let updated: Option<i64> = sqlx::query_scalar(
                    r#"
                    UPDATE invoices SET
                        source_provider = $1, external_invoice_id = $2, invoice_number = $3,
                        invoice_date = $4, currency = $5, total_net = $6, total_vat = $7,
                        total_gross = $8, source_month = $9, state_code = $10,
                        needs_review = $11, client_name = $12, external_modified_at = $13,
                        source_meta = $14, updated_at = now()
                    WHERE id = $15
                    RETURNING id
                    "#,
                )
                .bind(&record.source_provider)
                .bind(&record.external_invoice_id)
                .bind(&record.invoice_number)
                .bind(record.invoice_date)
                .bind(&record.currency)
                .bind(&record.total_net)
                .bind(&record.total_vat)
                .bind(&record.total_gross)
                .bind(&record.source_month)
                .bind(record.state_code.as_str())
                .bind(record.needs_review)
                .bind(&record.client_name)
                .bind(record.external_modified_at)
                .bind(Json(&record.source_meta))
                .bind(invoice_id)
                .fetch_optional(&mut *tx)
                .await?;
                updated.ok_or_else(|| StoreError::NotFound(format!("invoice {invoice_id}")))?
            }
        };

        sqlx::query("DELETE FROM invoice_items WHERE invoice_id = $1")
            .bind(invoice_id)
            .execute(&mut *tx)
            .await?;

        if !items.is_empty() {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO invoice_items (
                    invoice_id, description, units, unit_net_price, line_net_amount,
                    vat_rate, line_vat_amount, line_gross_amount, line_type, state_code
                ) ",
            );
            builder.push_values(items, |mut b, item| {
                b.push_bind(invoice_id)
                    .push_bind(&item.description)
                    .push_bind(item.units)
                    .push_bind(&item.unit_net_price)
                    .push_bind(&item.line_net_amount)
                    .push_bind(&item.vat_rate)
                    .push_bind(&item.line_vat_amount)
                    .push_bind(&item.line_gross_amount)
                    .push_bind(item.line_type.as_str())
                    .push_bind(item.state_code.as_str());
            });
            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;

        tracing::debug!(invoice_id, items = items.len(), ?plan, "invoice written");
        Ok(invoice_id)
    }

    async fn list_items(&self, invoice_id: i64) -> StoreResult<Vec<StoredInvoiceItem>> {
        let rows = sqlx::query(
            r#"
            SELECT id, invoice_id, description, units, unit_net_price, line_net_amount,
                   vat_rate, line_vat_amount, line_gross_amount, line_type, state_code
            FROM invoice_items
            WHERE invoice_id = $1
            ORDER BY id
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Self::map_item).collect()
    }
}
