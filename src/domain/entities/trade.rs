//! Trade vocabulary shared by the store and its callers.
//!
//! Every enum is stored as its short text code, which is also what the
//! `trades` table CHECK constraints accept.

use crate::domain::errors::ParseEnumError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Direction of a journaled position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "buy",
            TradeSide::Sell => "sell",
        }
    }
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradeSide {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "buy" => Ok(TradeSide::Buy),
            "sell" => Ok(TradeSide::Sell),
            _ => Err(ParseEnumError::new("trade side", s)),
        }
    }
}

/// Why a position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ExitReason {
    Manual,
    TakeProfit,
    StopLoss,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::Manual => "manual",
            ExitReason::TakeProfit => "take_profit",
            ExitReason::StopLoss => "stop_loss",
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution-discipline grade.
///
/// Variants are declared worst to best so the derived ordering reads
/// naturally: `ChecklistGrade::APlus > ChecklistGrade::F`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
pub enum ChecklistGrade {
    #[serde(rename = "F")]
    #[sqlx(rename = "F")]
    F,
    #[serde(rename = "D")]
    #[sqlx(rename = "D")]
    D,
    #[serde(rename = "D+")]
    #[sqlx(rename = "D+")]
    DPlus,
    #[serde(rename = "C")]
    #[sqlx(rename = "C")]
    C,
    #[serde(rename = "C+")]
    #[sqlx(rename = "C+")]
    CPlus,
    #[serde(rename = "B")]
    #[sqlx(rename = "B")]
    B,
    #[serde(rename = "B+")]
    #[sqlx(rename = "B+")]
    BPlus,
    #[serde(rename = "A")]
    #[sqlx(rename = "A")]
    A,
    #[serde(rename = "A+")]
    #[sqlx(rename = "A+")]
    APlus,
}

impl ChecklistGrade {
    /// All grades, best first
    pub const ALL: [ChecklistGrade; 9] = [
        ChecklistGrade::APlus,
        ChecklistGrade::A,
        ChecklistGrade::BPlus,
        ChecklistGrade::B,
        ChecklistGrade::CPlus,
        ChecklistGrade::C,
        ChecklistGrade::DPlus,
        ChecklistGrade::D,
        ChecklistGrade::F,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChecklistGrade::APlus => "A+",
            ChecklistGrade::A => "A",
            ChecklistGrade::BPlus => "B+",
            ChecklistGrade::B => "B",
            ChecklistGrade::CPlus => "C+",
            ChecklistGrade::C => "C",
            ChecklistGrade::DPlus => "D+",
            ChecklistGrade::D => "D",
            ChecklistGrade::F => "F",
        }
    }
}

impl std::fmt::Display for ChecklistGrade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical form of a ticker: trimmed and upper-cased
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

/// Realized profit and loss of a position, net of fees.
///
/// `None` until the position has an exit price.
pub fn realized_pnl(
    side: TradeSide,
    entry_price: f64,
    exit_price: Option<f64>,
    quantity: f64,
    lot_size: f64,
    fees: f64,
) -> Option<f64> {
    let exit_price = exit_price?;
    let move_per_unit = match side {
        TradeSide::Buy => exit_price - entry_price,
        TradeSide::Sell => entry_price - exit_price,
    };
    Some(move_per_unit * quantity * lot_size - fees)
}
