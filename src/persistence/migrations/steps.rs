//! Compiled-in schema history for the trade journal.
//!
//! Append new steps with the next sequence number. Never edit a step that
//! may already have been applied somewhere.

use super::{MigrationStep, SchemaChange};

/// Timestamp expression shared by column defaults and the update trigger.
/// Millisecond precision keeps successive writes distinguishable.
macro_rules! now_utc_ms {
    () => {
        "strftime('%Y-%m-%dT%H:%M:%fZ', 'now')"
    };
}

pub const TRADE_JOURNAL_MIGRATIONS: &[MigrationStep] = &[
    MigrationStep {
        sequence: 1,
        description: "create_trades",
        changes: &[
            SchemaChange::Statement(concat!(
                r#"
                CREATE TABLE IF NOT EXISTS trades (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    symbol TEXT NOT NULL CHECK (length(trim(symbol)) > 0),
                    side TEXT NOT NULL CHECK (side IN ('buy', 'sell')),
                    quantity REAL NOT NULL CHECK (quantity > 0),
                    entry_price REAL NOT NULL CHECK (entry_price > 0),
                    entry_time TEXT NOT NULL,
                    exit_price REAL CHECK (exit_price > 0),
                    exit_time TEXT,
                    fees REAL NOT NULL DEFAULT 0.0 CHECK (fees >= 0),
                    notes TEXT,
                    pnl REAL,
                    created_at TEXT NOT NULL DEFAULT ("#,
                now_utc_ms!(),
                r#"),
                    updated_at TEXT NOT NULL DEFAULT ("#,
                now_utc_ms!(),
                r#")
                )
                "#
            )),
            SchemaChange::Statement("CREATE INDEX IF NOT EXISTS idx_trades_symbol ON trades(symbol)"),
            SchemaChange::Statement(
                "CREATE INDEX IF NOT EXISTS idx_trades_entry_time ON trades(entry_time DESC)",
            ),
            // Nested UPDATE does not re-fire: recursive_triggers is off by default
            SchemaChange::Statement(concat!(
                r#"
                CREATE TRIGGER IF NOT EXISTS trg_trades_touch_updated_at
                AFTER UPDATE ON trades
                FOR EACH ROW
                BEGIN
                    UPDATE trades SET updated_at = "#,
                now_utc_ms!(),
                r#" WHERE id = NEW.id;
                END
                "#
            )),
        ],
    },
    MigrationStep {
        sequence: 2,
        description: "add_risk_targets",
        changes: &[
            SchemaChange::AddColumn {
                table: "trades",
                column: "stop_loss",
                definition: "REAL CHECK (stop_loss > 0)",
            },
            SchemaChange::AddColumn {
                table: "trades",
                column: "take_profit",
                definition: "REAL CHECK (take_profit > 0)",
            },
        ],
    },
    MigrationStep {
        sequence: 3,
        description: "add_exit_reason",
        changes: &[SchemaChange::AddColumn {
            table: "trades",
            column: "exit_reason",
            definition: "TEXT CHECK (exit_reason IN ('manual', 'take_profit', 'stop_loss'))",
        }],
    },
    MigrationStep {
        sequence: 4,
        description: "add_lot_size",
        changes: &[SchemaChange::AddColumn {
            table: "trades",
            column: "lot_size",
            definition: "REAL NOT NULL DEFAULT 1.0 CHECK (lot_size > 0)",
        }],
    },
    MigrationStep {
        sequence: 5,
        description: "add_checklist",
        changes: &[
            SchemaChange::AddColumn {
                table: "trades",
                column: "checklist_grade",
                definition: "TEXT CHECK (checklist_grade IN ('A+', 'A', 'B+', 'B', 'C+', 'C', 'D+', 'D', 'F'))",
            },
            SchemaChange::AddColumn {
                table: "trades",
                column: "checklist_score",
                definition: "INTEGER CHECK (checklist_score BETWEEN 0 AND 100)",
            },
        ],
    },
    MigrationStep {
        sequence: 6,
        description: "harden_timestamps",
        changes: &[
            SchemaChange::Statement("DROP TRIGGER IF EXISTS trg_trades_touch_updated_at"),
            // Bumps by a millisecond when the clock has not moved past the
            // previous value, and never lands before created_at.
            SchemaChange::Statement(concat!(
                r#"
                CREATE TRIGGER IF NOT EXISTS trg_trades_touch_updated_at
                AFTER UPDATE ON trades
                FOR EACH ROW
                BEGIN
                    UPDATE trades SET updated_at = max(
                        "#,
                now_utc_ms!(),
                r#",
                        coalesce(strftime('%Y-%m-%dT%H:%M:%fZ', OLD.updated_at, '+0.001 seconds'), "#,
                now_utc_ms!(),
                r#"),
                        coalesce(strftime('%Y-%m-%dT%H:%M:%fZ', NEW.created_at), "#,
                now_utc_ms!(),
                r#")
                    )
                    WHERE id = NEW.id;
                END
                "#
            )),
            // The nested UPDATE also runs the touch trigger above
            SchemaChange::Statement(
                r#"
                CREATE TRIGGER IF NOT EXISTS trg_trades_align_updated_at
                AFTER INSERT ON trades
                FOR EACH ROW
                WHEN NEW.updated_at IS NOT NEW.created_at
                BEGIN
                    UPDATE trades SET updated_at = NEW.created_at WHERE id = NEW.id;
                END
                "#,
            ),
            SchemaChange::Statement(
                r#"
                CREATE TRIGGER IF NOT EXISTS trg_trades_guard_identity
                BEFORE UPDATE OF id, created_at ON trades
                FOR EACH ROW
                WHEN NEW.id IS NOT OLD.id OR NEW.created_at IS NOT OLD.created_at
                BEGIN
                    SELECT RAISE(ABORT, 'trades.id and trades.created_at are immutable');
                END
                "#,
            ),
        ],
    },
];
