//! Database Models
//!
//! Persistent trade rows plus the inputs used to create, change and query them.

use crate::domain::entities::trade::{ChecklistGrade, ExitReason, TradeSide};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Trade record in database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct TradeRecord {
    pub id: i64,
    pub symbol: String,
    pub side: TradeSide,
    pub quantity: f64,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_price: Option<f64>,
    pub exit_time: Option<DateTime<Utc>>,
    pub fees: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub lot_size: f64,
    pub checklist_grade: Option<ChecklistGrade>,
    pub checklist_score: Option<i64>,
    pub exit_reason: Option<ExitReason>,
    pub pnl: Option<f64>, // derived from the prices unless the caller set it
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TradeRecord {
    /// Closed once both exit price and exit time are known
    pub fn is_closed(&self) -> bool {
        self.exit_price.is_some() && self.exit_time.is_some()
    }

    /// Time held, for closed trades only
    pub fn duration(&self) -> Option<Duration> {
        if !self.is_closed() {
            return None;
        }
        self.exit_time.map(|exit| exit - self.entry_time)
    }
}

/// Create trade input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTrade {
    pub symbol: String,
    pub side: TradeSide,
    pub quantity: f64,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_price: Option<f64>,
    pub exit_time: Option<DateTime<Utc>>,
    pub fees: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub lot_size: f64,
    pub checklist_grade: Option<ChecklistGrade>,
    pub checklist_score: Option<i64>,
    pub exit_reason: Option<ExitReason>,
    pub pnl: Option<f64>,
    pub notes: Option<String>,
}

impl NewTrade {
    /// Open trade with no fees and a lot size of one
    pub fn new(
        symbol: impl Into<String>,
        side: TradeSide,
        quantity: f64,
        entry_price: f64,
        entry_time: DateTime<Utc>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            entry_price,
            entry_time,
            exit_price: None,
            exit_time: None,
            fees: 0.0,
            stop_loss: None,
            take_profit: None,
            lot_size: 1.0,
            checklist_grade: None,
            checklist_score: None,
            exit_reason: None,
            pnl: None,
            notes: None,
        }
    }
}

/// Update trade input. `None` leaves the stored value unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradeUpdate {
    pub symbol: Option<String>,
    pub side: Option<TradeSide>,
    pub quantity: Option<f64>,
    pub entry_price: Option<f64>,
    pub entry_time: Option<DateTime<Utc>>,
    pub exit_price: Option<f64>,
    pub exit_time: Option<DateTime<Utc>>,
    pub fees: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub lot_size: Option<f64>,
    pub checklist_grade: Option<ChecklistGrade>,
    pub checklist_score: Option<i64>,
    pub exit_reason: Option<ExitReason>,
    pub pnl: Option<f64>,
    pub notes: Option<String>,
}

impl TradeUpdate {
    pub fn is_empty(&self) -> bool {
        self.symbol.is_none()
            && self.side.is_none()
            && self.quantity.is_none()
            && self.entry_price.is_none()
            && self.entry_time.is_none()
            && self.exit_price.is_none()
            && self.exit_time.is_none()
            && self.fees.is_none()
            && self.stop_loss.is_none()
            && self.take_profit.is_none()
            && self.lot_size.is_none()
            && self.checklist_grade.is_none()
            && self.checklist_score.is_none()
            && self.exit_reason.is_none()
            && self.pnl.is_none()
            && self.notes.is_none()
    }
}

/// Listing filter. Unset fields do not restrict the result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradeFilter {
    pub symbol: Option<String>,
    pub side: Option<TradeSide>,
    /// Inclusive lower bound on `entry_time`
    pub entered_from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `entry_time`
    pub entered_to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl TradeFilter {
    pub fn for_symbol(symbol: impl Into<String>) -> Self {
        Self {
            symbol: Some(symbol.into()),
            ..Self::default()
        }
    }

    pub fn with_page(mut self, limit: i64, offset: i64) -> Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }
}
