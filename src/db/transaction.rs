/*!
 * Atomic unit of work
 *
 * Every multi-statement mutation (checkout, cancellation, completion, cart
 * persistence) runs through [`unit_of_work`], which commits when the closure
 * returns `Ok` and rolls back every statement otherwise.
 */

use futures::future::BoxFuture;
use sea_orm::{DatabaseConnection, DatabaseTransaction, TransactionError, TransactionTrait};
use tracing::warn;

use crate::errors::ServiceError;

/// Execute `work` inside one database transaction.
///
/// Domain errors raised by `work` come back unchanged so callers can match on
/// them. Storage errors, whether raised by a statement inside `work` or by the
/// commit/rollback itself, surface as [`ServiceError::TransactionFailure`].
///
/// # Example
///
/// ```rust,ignore
/// let order = unit_of_work(&db, |txn| {
///     Box::pin(async move {
///         let order = new_order.insert(txn).await?;
///         CatalogService::decrement_stock(txn, product_id, 2).await?;
///         Ok(order)
///     })
/// })
/// .await?;
/// ```
pub async fn unit_of_work<F, T>(db: &DatabaseConnection, work: F) -> Result<T, ServiceError>
where
    F: for<'c> FnOnce(&'c DatabaseTransaction) -> BoxFuture<'c, Result<T, ServiceError>> + Send,
    T: Send,
{
    db.transaction::<F, T, ServiceError>(work)
        .await
        .map_err(|err| match err {
            TransactionError::Connection(db_err) => {
                warn!(error = %db_err, "Transaction could not be committed");
                ServiceError::TransactionFailure(db_err)
            }
            TransactionError::Transaction(ServiceError::DatabaseError(db_err)) => {
                warn!(error = %db_err, "Statement failed inside transaction; rolled back");
                ServiceError::TransactionFailure(db_err)
            }
            TransactionError::Transaction(other) => other,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use sea_orm::{ConnectionTrait, Database, DbErr, Statement};

    async fn scratch_db() -> DatabaseConnection {
        let db = Database::connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        db.execute(Statement::from_string(
            db.get_database_backend(),
            "CREATE TABLE ledger (id INTEGER PRIMARY KEY, note TEXT NOT NULL)".to_string(),
        ))
        .await
        .expect("create table");
        db
    }

    async fn count_rows(db: &DatabaseConnection) -> i64 {
        let row = db
            .query_one(Statement::from_string(
                db.get_database_backend(),
                "SELECT COUNT(*) AS n FROM ledger".to_string(),
            ))
            .await
            .expect("count query")
            .expect("count row");
        row.try_get("", "n").expect("count column")
    }

    fn insert_note(note: &str) -> Statement {
        Statement::from_string(
            sea_orm::DbBackend::Sqlite,
            format!("INSERT INTO ledger (note) VALUES ('{}')", note),
        )
    }

    #[tokio::test]
    async fn commits_when_work_succeeds() {
        let db = scratch_db().await;

        let value = unit_of_work(&db, |txn| {
            Box::pin(async move {
                txn.execute(insert_note("first")).await?;
                txn.execute(insert_note("second")).await?;
                Ok(2)
            })
        })
        .await
        .expect("unit of work commits");

        assert_eq!(value, 2);
        assert_eq!(count_rows(&db).await, 2);
    }

    #[tokio::test]
    async fn domain_error_rolls_back_and_is_returned_unchanged() {
        let db = scratch_db().await;

        let result: Result<(), _> = unit_of_work(&db, |txn| {
            Box::pin(async move {
                txn.execute(insert_note("orphan")).await?;
                Err(ServiceError::EmptyCart)
            })
        })
        .await;

        assert_matches!(result, Err(ServiceError::EmptyCart));
        assert_eq!(count_rows(&db).await, 0);
    }

    #[tokio::test]
    async fn storage_error_becomes_transaction_failure() {
        let db = scratch_db().await;

        let result: Result<(), _> = unit_of_work(&db, |txn| {
            Box::pin(async move {
                txn.execute(insert_note("kept?")).await?;
                Err(ServiceError::DatabaseError(DbErr::Custom("boom".into())))
            })
        })
        .await;

        assert_matches!(result, Err(ServiceError::TransactionFailure(_)));
        assert_eq!(count_rows(&db).await, 0);
    }
}
