//! DDL for the account store
//!
//! Amounts are BIGINT minor units and timestamps BIGINT epoch millis so the
//! same rows decode on both backends.

pub const PG_CREATE_ACCOUNTS: &str = r#"
CREATE TABLE IF NOT EXISTS ledger_accounts (
    id               TEXT PRIMARY KEY,
    display_name     TEXT NOT NULL,
    balance          BIGINT NOT NULL DEFAULT 0 CHECK (balance >= 0),
    tier             BIGINT NOT NULL DEFAULT 1,
    total_interest   BIGINT NOT NULL DEFAULT 0,
    last_interest_at BIGINT,
    last_active_at   BIGINT NOT NULL,
    created_at       BIGINT NOT NULL,
    updated_at       BIGINT NOT NULL
)
"#;

pub const PG_CREATE_ACCOUNTS_NAME_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_ledger_accounts_name ON ledger_accounts (LOWER(display_name))
"#;

pub const PG_CREATE_ACCOUNTS_BALANCE_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_ledger_accounts_balance ON ledger_accounts (balance DESC)
"#;

pub const PG_CREATE_LOG: &str = r#"
CREATE TABLE IF NOT EXISTS ledger_transactions (
    seq               BIGSERIAL PRIMARY KEY,
    account_id        TEXT NOT NULL,
    display_name      TEXT NOT NULL,
    tx_type           BIGINT NOT NULL,
    amount            BIGINT NOT NULL,
    balance_before    BIGINT NOT NULL,
    balance_after     BIGINT NOT NULL,
    counterparty_id   TEXT,
    counterparty_name TEXT,
    origin_instance   TEXT NOT NULL,
    reason            TEXT NOT NULL,
    is_admin          BOOLEAN NOT NULL DEFAULT FALSE,
    admin_name        TEXT,
    created_at        BIGINT NOT NULL
)
"#;

pub const PG_CREATE_LOG_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_ledger_transactions_account
    ON ledger_transactions (account_id, seq DESC)
"#;

pub const PG_SCHEMA: &[&str] = &[
    PG_CREATE_ACCOUNTS,
    PG_CREATE_ACCOUNTS_NAME_INDEX,
    PG_CREATE_ACCOUNTS_BALANCE_INDEX,
    PG_CREATE_LOG,
    PG_CREATE_LOG_INDEX,
];

// SQLite: no balance CHECK; a negative result reaches the pipeline's
// post-debit check instead.
pub const SQLITE_CREATE_ACCOUNTS: &str = r#"
CREATE TABLE IF NOT EXISTS ledger_accounts (
    id               TEXT PRIMARY KEY,
    display_name     TEXT NOT NULL,
    balance          INTEGER NOT NULL DEFAULT 0,
    tier             INTEGER NOT NULL DEFAULT 1,
    total_interest   INTEGER NOT NULL DEFAULT 0,
    last_interest_at INTEGER,
    last_active_at   INTEGER NOT NULL,
    created_at       INTEGER NOT NULL,
    updated_at       INTEGER NOT NULL
)
"#;

pub const SQLITE_CREATE_ACCOUNTS_NAME_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_ledger_accounts_name
    ON ledger_accounts (display_name COLLATE NOCASE)
"#;

pub const SQLITE_CREATE_LOG: &str = r#"
CREATE TABLE IF NOT EXISTS ledger_transactions (
    seq               INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id        TEXT NOT NULL,
    display_name      TEXT NOT NULL,
    tx_type           INTEGER NOT NULL,
    amount            INTEGER NOT NULL,
    balance_before    INTEGER NOT NULL,
    balance_after     INTEGER NOT NULL,
    counterparty_id   TEXT,
    counterparty_name TEXT,
    origin_instance   TEXT NOT NULL,
    reason            TEXT NOT NULL,
    is_admin          BOOLEAN NOT NULL DEFAULT 0,
    admin_name        TEXT,
    created_at        INTEGER NOT NULL
)
"#;

pub const SQLITE_CREATE_LOG_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_ledger_transactions_account
    ON ledger_transactions (account_id, seq DESC)
"#;

pub const SQLITE_SCHEMA: &[&str] = &[
    SQLITE_CREATE_ACCOUNTS,
    SQLITE_CREATE_ACCOUNTS_NAME_INDEX,
    SQLITE_CREATE_LOG,
    SQLITE_CREATE_LOG_INDEX,
];
