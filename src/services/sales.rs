use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::Serialize;
use tracing::instrument;

use crate::{
    entities::{sales_record, SalesRecord, SalesRecordModel},
    errors::ServiceError,
};

/// Revenue over a reporting window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SalesSummary {
    pub orders: u64,
    pub revenue: Decimal,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// Append-only ledger of completed sales.
#[derive(Clone)]
pub struct SalesLedger {
    db: Arc<DatabaseConnection>,
}

impl SalesLedger {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Appends a sale. Called by the order engine inside the completion
    /// transaction; the unique index on `order_id` rejects a second record
    /// for the same order.
    pub async fn record<C: ConnectionTrait>(
        conn: &C,
        order_id: i32,
        amount: Decimal,
    ) -> Result<SalesRecordModel, ServiceError> {
        let record = sales_record::ActiveModel {
            order_id: Set(order_id),
            amount: Set(amount),
            recorded_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(conn)
        .await?;
        Ok(record)
    }

    /// Sales recorded in `[from, to)`, oldest first.
    #[instrument(skip(self))]
    pub async fn list(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SalesRecordModel>, ServiceError> {
        if from > to {
            return Err(ServiceError::ValidationError(format!(
                "Report window starts after it ends ({} > {})",
                from, to
            )));
        }

        Ok(SalesRecord::find()
            .filter(sales_record::Column::RecordedAt.gte(from))
            .filter(sales_record::Column::RecordedAt.lt(to))
            .order_by_asc(sales_record::Column::RecordedAt)
            .order_by_asc(sales_record::Column::Id)
            .all(&*self.db)
            .await?)
    }

    /// Order count and revenue for `[from, to)`.
    pub async fn summary(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<SalesSummary, ServiceError> {
        let records = self.list(from, to).await?;
        Ok(SalesSummary {
            orders: records.len() as u64,
            revenue: records.iter().map(|r| r.amount).sum(),
            from,
            to,
        })
    }

    /// The ledger entry for one order, if it has completed.
    pub async fn for_order(&self, order_id: i32) -> Result<Option<SalesRecordModel>, ServiceError> {
        Ok(SalesRecord::find()
            .filter(sales_record::Column::OrderId.eq(order_id))
            .one(&*self.db)
            .await?)
    }
}
