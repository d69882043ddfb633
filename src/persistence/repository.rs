//! Database Repository
//!
//! Data access layer for journaled trades.

use super::models::*;
use super::{transaction, DatabaseError, DbPool};
use crate::domain::entities::trade::{normalize_symbol, realized_pnl};
use async_trait::async_trait;
use sqlx::SqliteConnection;
use tracing::{debug, error, info};

/// Trade repository trait
#[async_trait]
pub trait TradeStore: Send + Sync {
    async fn create(&self, trade: NewTrade) -> Result<TradeRecord, DatabaseError>;
    async fn get(&self, id: i64) -> Result<Option<TradeRecord>, DatabaseError>;
    async fn list(&self, filter: &TradeFilter) -> Result<Vec<TradeRecord>, DatabaseError>;
    async fn count(&self, filter: &TradeFilter) -> Result<i64, DatabaseError>;
    async fn update(
        &self,
        id: i64,
        update: TradeUpdate,
    ) -> Result<Option<TradeRecord>, DatabaseError>;
    async fn delete(&self, id: i64) -> Result<bool, DatabaseError>;
    async fn clear(&self) -> Result<u64, DatabaseError>;
}

/// SQLite-backed trade repository
#[derive(Clone)]
pub struct SqliteTradeStore {
    pool: DbPool,
}

impl SqliteTradeStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn fetch_on(
        conn: &mut SqliteConnection,
        id: i64,
    ) -> Result<Option<TradeRecord>, DatabaseError> {
        sqlx::query_as::<_, TradeRecord>("SELECT * FROM trades WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| DatabaseError::from_query("Failed to get trade", e))
    }

    /// Merge, write and re-read one trade while holding the write lock
    async fn update_locked(
        conn: &mut SqliteConnection,
        id: i64,
        update: TradeUpdate,
    ) -> Result<Option<TradeRecord>, DatabaseError> {
        let Some(existing) = Self::fetch_on(conn, id).await? else {
            debug!("Trade {} not found for update", id);
            return Ok(None);
        };

        // A supplied pnl wins; otherwise derive it from the merged row
        let pnl = update.pnl.or_else(|| {
            realized_pnl(
                update.side.unwrap_or(existing.side),
                update.entry_price.unwrap_or(existing.entry_price),
                update.exit_price.or(existing.exit_price),
                update.quantity.unwrap_or(existing.quantity),
                update.lot_size.unwrap_or(existing.lot_size),
                update.fees.unwrap_or(existing.fees),
            )
        });

        sqlx::query(
            r#"
            UPDATE trades SET
                symbol = COALESCE(?2, symbol),
                side = COALESCE(?3, side),
                quantity = COALESCE(?4, quantity),
                entry_price = COALESCE(?5, entry_price),
                entry_time = COALESCE(?6, entry_time),
                exit_price = COALESCE(?7, exit_price),
                exit_time = COALESCE(?8, exit_time),
                fees = COALESCE(?9, fees),
                stop_loss = COALESCE(?10, stop_loss),
                take_profit = COALESCE(?11, take_profit),
                lot_size = COALESCE(?12, lot_size),
                checklist_grade = COALESCE(?13, checklist_grade),
                checklist_score = COALESCE(?14, checklist_score),
                exit_reason = COALESCE(?15, exit_reason),
                pnl = COALESCE(?16, pnl),
                notes = COALESCE(?17, notes)
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(update.symbol.as_deref().map(normalize_symbol))
        .bind(update.side)
        .bind(update.quantity)
        .bind(update.entry_price)
        .bind(update.entry_time)
        .bind(update.exit_price)
        .bind(update.exit_time)
        .bind(update.fees)
        .bind(update.stop_loss)
        .bind(update.take_profit)
        .bind(update.lot_size)
        .bind(update.checklist_grade)
        .bind(update.checklist_score)
        .bind(update.exit_reason)
        .bind(pnl)
        .bind(&update.notes)
        .execute(&mut *conn)
        .await
        .map_err(|e| DatabaseError::from_query("Failed to update trade", e))?;

        Self::fetch_on(conn, id).await
    }
}

// Unset filter fields bind NULL and drop out of the predicate
const FILTER_PREDICATE: &str = r#"
    (?1 IS NULL OR symbol = ?1)
    AND (?2 IS NULL OR side = ?2)
    AND (?3 IS NULL OR entry_time >= ?3)
    AND (?4 IS NULL OR entry_time <= ?4)
"#;

#[async_trait]
impl TradeStore for SqliteTradeStore {
    /// Insert a trade; the store assigns id and both timestamps
    async fn create(&self, trade: NewTrade) -> Result<TradeRecord, DatabaseError> {
        let pnl = trade.pnl.or_else(|| {
            realized_pnl(
                trade.side,
                trade.entry_price,
                trade.exit_price,
                trade.quantity,
                trade.lot_size,
                trade.fees,
            )
        });

        let record = sqlx::query_as::<_, TradeRecord>(
            r#"
            INSERT INTO trades (
                symbol, side, quantity, entry_price, entry_time,
                exit_price, exit_time, fees, stop_loss, take_profit,
                lot_size, checklist_grade, checklist_score, exit_reason, pnl, notes
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            RETURNING *
            "#,
        )
        .bind(normalize_symbol(&trade.symbol))
        .bind(trade.side)
        .bind(trade.quantity)
        .bind(trade.entry_price)
        .bind(trade.entry_time)
        .bind(trade.exit_price)
        .bind(trade.exit_time)
        .bind(trade.fees)
        .bind(trade.stop_loss)
        .bind(trade.take_profit)
        .bind(trade.lot_size)
        .bind(trade.checklist_grade)
        .bind(trade.checklist_score)
        .bind(trade.exit_reason)
        .bind(pnl)
        .bind(&trade.notes)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to create trade: {}", e);
            DatabaseError::from_query("Failed to create trade", e)
        })?;

        debug!("Created trade: {} for {}", record.id, record.symbol);
        Ok(record)
    }

    /// Get trade by ID
    async fn get(&self, id: i64) -> Result<Option<TradeRecord>, DatabaseError> {
        sqlx::query_as::<_, TradeRecord>("SELECT * FROM trades WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to get trade {}: {}", id, e);
                DatabaseError::from_query("Failed to get trade", e)
            })
    }

    /// Newest entry first; ties broken by id, newest first
    async fn list(&self, filter: &TradeFilter) -> Result<Vec<TradeRecord>, DatabaseError> {
        let sql = format!(
            "SELECT * FROM trades WHERE {} ORDER BY entry_time DESC, id DESC LIMIT ?5 OFFSET ?6",
            FILTER_PREDICATE
        );

        sqlx::query_as::<_, TradeRecord>(&sql)
            .bind(filter.symbol.as_deref().map(normalize_symbol))
            .bind(filter.side)
            .bind(filter.entered_from)
            .bind(filter.entered_to)
            .bind(filter.limit.unwrap_or(-1))
            .bind(filter.offset.unwrap_or(0).max(0))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to list trades: {}", e);
                DatabaseError::from_query("Failed to list trades", e)
            })
    }

    /// Matching rows, ignoring limit and offset
    async fn count(&self, filter: &TradeFilter) -> Result<i64, DatabaseError> {
        let sql = format!("SELECT COUNT(*) FROM trades WHERE {}", FILTER_PREDICATE);

        sqlx::query_scalar::<_, i64>(&sql)
            .bind(filter.symbol.as_deref().map(normalize_symbol))
            .bind(filter.side)
            .bind(filter.entered_from)
            .bind(filter.entered_to)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to count trades: {}", e);
                DatabaseError::from_query("Failed to count trades", e)
            })
    }

    /// Apply the fields present in `update`.
    ///
    /// `updated_at` is never written here; the row trigger owns it. The read,
    /// the write and the re-read share one locked transaction, so the result
    /// is this update's row even with other writers around.
    async fn update(
        &self,
        id: i64,
        update: TradeUpdate,
    ) -> Result<Option<TradeRecord>, DatabaseError> {
        if update.is_empty() {
            return self.get(id).await;
        }

        let mut conn = transaction::begin_immediate(&self.pool)
            .await
            .map_err(|e| DatabaseError::from_query("Failed to lock trades for update", e))?;

        match Self::update_locked(&mut conn, id, update).await {
            Ok(record) => {
                transaction::commit(conn, "trade update")
                    .await
                    .map_err(|e| DatabaseError::from_query("Failed to commit trade update", e))?;
                if record.is_some() {
                    debug!("Updated trade: {}", id);
                }
                Ok(record)
            }
            Err(e) => {
                error!("Failed to update trade {}: {}", id, e);
                transaction::rollback(conn, "trade update").await;
                Err(e)
            }
        }
    }

    /// Returns whether a row was removed
    async fn delete(&self, id: i64) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM trades WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to delete trade {}: {}", id, e);
                DatabaseError::from_query("Failed to delete trade", e)
            })?;

        Ok(result.rows_affected() > 0)
    }

    async fn clear(&self) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM trades")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to clear trades: {}", e);
                DatabaseError::from_query("Failed to clear trades", e)
            })?;

        info!("Cleared {} trade(s)", result.rows_affected());
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::trade::{ChecklistGrade, ExitReason, TradeSide};
    use crate::persistence::init_database;
    use chrono::{Duration, TimeZone, Utc};

    async fn store() -> SqliteTradeStore {
        let pool = init_database("sqlite::memory:").await.unwrap();
        SqliteTradeStore::new(pool)
    }

    fn trade_at(symbol: &str, side: TradeSide, minutes: i64) -> NewTrade {
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        NewTrade::new(symbol, side, 1.0, 100.0, base + Duration::minutes(minutes))
    }

    #[tokio::test]
    async fn test_trade_crud() {
        let repo = store().await;

        // Create trade
        let mut trade = trade_at("EURUSD", TradeSide::Buy, 0);
        trade.stop_loss = Some(95.0);
        trade.take_profit = Some(110.0);
        trade.checklist_grade = Some(ChecklistGrade::APlus);
        trade.checklist_score = Some(92);

        let created = repo.create(trade).await.unwrap();
        assert!(created.id > 0);
        assert_eq!(created.symbol, "EURUSD");
        assert_eq!(created.checklist_grade, Some(ChecklistGrade::APlus));
        assert_eq!(created.lot_size, 1.0);
        assert!(created.updated_at >= created.created_at);

        // Get trade
        let fetched = repo.get(created.id).await.unwrap().unwrap();
        assert_eq!(fetched, created);

        // Close trade
        let exit_time = created.entry_time + Duration::hours(2);
        let update = TradeUpdate {
            exit_price: Some(110.0),
            exit_time: Some(exit_time),
            exit_reason: Some(ExitReason::TakeProfit),
            pnl: Some(10.0),
            ..Default::default()
        };
        let closed = repo.update(created.id, update).await.unwrap().unwrap();
        assert!(closed.is_closed());
        assert_eq!(closed.exit_reason, Some(ExitReason::TakeProfit));
        assert_eq!(closed.pnl, Some(10.0));
        assert_eq!(closed.stop_loss, Some(95.0));
        assert_eq!(closed.duration(), Some(Duration::hours(2)));

        // Delete trade
        assert!(repo.delete(created.id).await.unwrap());
        assert!(!repo.delete(created.id).await.unwrap());
        assert!(repo.get(created.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ids_are_not_reused() {
        let repo = store().await;

        let first = repo.create(trade_at("EURUSD", TradeSide::Buy, 0)).await.unwrap();
        repo.delete(first.id).await.unwrap();
        let second = repo.create(trade_at("EURUSD", TradeSide::Buy, 1)).await.unwrap();

        assert!(second.id > first.id);
    }

    #[tokio::test]
    async fn test_update_missing_trade_returns_none() {
        let repo = store().await;

        let update = TradeUpdate {
            notes: Some("ghost".to_string()),
            ..Default::default()
        };
        assert!(repo.update(999, update).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_values_are_constraint_violations() {
        let repo = store().await;

        let mut trade = trade_at("EURUSD", TradeSide::Buy, 0);
        trade.quantity = 0.0;
        let err = repo.create(trade).await.unwrap_err();
        assert!(err.is_constraint_violation(), "unexpected error: {}", err);

        let created = repo.create(trade_at("EURUSD", TradeSide::Buy, 0)).await.unwrap();
        let update = TradeUpdate {
            fees: Some(-1.0),
            ..Default::default()
        };
        let err = repo.update(created.id, update).await.unwrap_err();
        assert!(err.is_constraint_violation());

        let unchanged = repo.get(created.id).await.unwrap().unwrap();
        assert_eq!(unchanged.fees, 0.0);
    }

    #[tokio::test]
    async fn test_list_filters_and_orders() {
        let repo = store().await;

        repo.create(trade_at("EURUSD", TradeSide::Buy, 0)).await.unwrap();
        repo.create(trade_at("EURUSD", TradeSide::Sell, 30)).await.unwrap();
        repo.create(trade_at("GBPUSD", TradeSide::Buy, 60)).await.unwrap();
        repo.create(trade_at("EURUSD", TradeSide::Buy, 90)).await.unwrap();

        let all = repo.list(&TradeFilter::default()).await.unwrap();
        assert_eq!(all.len(), 4);
        assert!(all.windows(2).all(|pair| pair[0].entry_time >= pair[1].entry_time));

        let eur = repo.list(&TradeFilter::for_symbol("EURUSD")).await.unwrap();
        assert_eq!(eur.len(), 3);

        let eur_buys = TradeFilter {
            side: Some(TradeSide::Buy),
            ..TradeFilter::for_symbol("EURUSD")
        };
        assert_eq!(repo.count(&eur_buys).await.unwrap(), 2);

        let base = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let window = TradeFilter {
            entered_from: Some(base + Duration::minutes(30)),
            entered_to: Some(base + Duration::minutes(60)),
            ..Default::default()
        };
        let in_window = repo.list(&window).await.unwrap();
        assert_eq!(in_window.len(), 2);
        assert_eq!(in_window[0].symbol, "GBPUSD");
    }

    #[tokio::test]
    async fn test_list_pagination() {
        let repo = store().await;
        for minutes in 0..5 {
            repo.create(trade_at("XAUUSD", TradeSide::Buy, minutes)).await.unwrap();
        }

        let page = repo
            .list(&TradeFilter::default().with_page(2, 1))
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].entry_time.timestamp() % 3600 / 60, 3);

        let filter = TradeFilter::default().with_page(2, 0);
        assert_eq!(repo.count(&filter).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_pnl_derived_on_create() {
        let repo = store().await;

        let mut buy = trade_at("EURUSD", TradeSide::Buy, 0);
        buy.entry_price = 1.0;
        buy.exit_price = Some(1.5);
        buy.quantity = 2.0;
        buy.fees = 0.1;
        let buy = repo.create(buy).await.unwrap();
        assert!((buy.pnl.unwrap() - 0.9).abs() < 1e-9);

        let mut sell = trade_at("XAUUSD", TradeSide::Sell, 1);
        sell.entry_price = 2000.0;
        sell.exit_price = Some(1990.0);
        sell.lot_size = 10.0;
        sell.fees = 5.0;
        let sell = repo.create(sell).await.unwrap();
        assert!((sell.pnl.unwrap() - 95.0).abs() < 1e-9);

        let open = repo.create(trade_at("GBPUSD", TradeSide::Buy, 2)).await.unwrap();
        assert_eq!(open.pnl, None);
    }

    #[tokio::test]
    async fn test_pnl_recomputed_from_merged_update() {
        let repo = store().await;
        let created = repo.create(trade_at("EURUSD", TradeSide::Sell, 0)).await.unwrap();

        let close = TradeUpdate {
            exit_price: Some(90.0),
            fees: Some(1.0),
            ..Default::default()
        };
        let closed = repo.update(created.id, close).await.unwrap().unwrap();
        assert!((closed.pnl.unwrap() - 9.0).abs() < 1e-9);

        // Resizing an already closed trade derives again from stored prices
        let resize = TradeUpdate {
            quantity: Some(3.0),
            ..Default::default()
        };
        let resized = repo.update(created.id, resize).await.unwrap().unwrap();
        assert!((resized.pnl.unwrap() - 29.0).abs() < 1e-9);

        let manual = TradeUpdate {
            exit_price: Some(80.0),
            pnl: Some(-12.5),
            ..Default::default()
        };
        let manual = repo.update(created.id, manual).await.unwrap().unwrap();
        assert_eq!(manual.pnl, Some(-12.5));
    }

    #[tokio::test]
    async fn test_symbols_are_normalized() {
        let repo = store().await;

        let created = repo.create(trade_at(" eurusd ", TradeSide::Buy, 0)).await.unwrap();
        assert_eq!(created.symbol, "EURUSD");
        assert_eq!(repo.count(&TradeFilter::for_symbol("eurusd")).await.unwrap(), 1);
        assert_eq!(repo.list(&TradeFilter::for_symbol(" EurUsd")).await.unwrap().len(), 1);

        let rename = TradeUpdate {
            symbol: Some("gbpusd\t".to_string()),
            ..Default::default()
        };
        let renamed = repo.update(created.id, rename).await.unwrap().unwrap();
        assert_eq!(renamed.symbol, "GBPUSD");
    }

    #[tokio::test]
    async fn test_back_to_back_updates_advance_updated_at() {
        let repo = store().await;
        let created = repo.create(trade_at("EURUSD", TradeSide::Buy, 0)).await.unwrap();

        let mut previous = created.updated_at;
        for n in 0..20 {
            let update = TradeUpdate {
                notes: Some(format!("revision {}", n)),
                ..Default::default()
            };
            let updated = repo.update(created.id, update).await.unwrap().unwrap();
            assert!(updated.updated_at > previous, "revision {} did not advance", n);
            assert_eq!(updated.created_at, created.created_at);
            previous = updated.updated_at;
        }
    }

    #[tokio::test]
    async fn test_clear_removes_everything() {
        let repo = store().await;
        repo.create(trade_at("EURUSD", TradeSide::Buy, 0)).await.unwrap();
        repo.create(trade_at("GBPUSD", TradeSide::Sell, 1)).await.unwrap();

        assert_eq!(repo.clear().await.unwrap(), 2);
        assert_eq!(repo.count(&TradeFilter::default()).await.unwrap(), 0);
    }
}
