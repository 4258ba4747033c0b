//! Initial database schema for Hearth.
//!
//! Creates the household directory (users, groups, memberships, categories),
//! money accounts, the append-only journal with its legs, savings goals and
//! notifications.

use sea_orm_migration::prelude::*;

/// Initial schema migration.
#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();

        // ============================================================
        // PART 1: ENUMS
        // ============================================================
        db.execute_unprepared(ENUMS_SQL).await?;

        // ============================================================
        // PART 2: DIRECTORY
        // ============================================================
        db.execute_unprepared(USERS_SQL).await?;
        db.execute_unprepared(GROUPS_SQL).await?;
        db.execute_unprepared(USER_GROUPS_SQL).await?;
        db.execute_unprepared(CATEGORIES_SQL).await?;

        // ============================================================
        // PART 3: ACCOUNTS
        // ============================================================
        db.execute_unprepared(ACCOUNTS_SQL).await?;
        db.execute_unprepared(ACCOUNTS_GROUPS_SQL).await?;

        // ============================================================
        // PART 4: GOALS
        // ============================================================
        db.execute_unprepared(GOALS_SQL).await?;

        // ============================================================
        // PART 5: JOURNAL
        // ============================================================
        db.execute_unprepared(JOURNAL_ENTRIES_SQL).await?;
        db.execute_unprepared(JOURNAL_LEGS_SQL).await?;
        db.execute_unprepared(JOURNAL_TRIGGERS_SQL).await?;

        // ============================================================
        // PART 6: NOTIFICATIONS
        // ============================================================
        db.execute_unprepared(NOTIFICATIONS_SQL).await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(DROP_ALL_SQL).await?;
        Ok(())
    }
}

// ============================================================
// SQL CONSTANTS
// ============================================================

const ENUMS_SQL: &str = r"
CREATE TYPE user_role AS ENUM ('admin', 'user');

CREATE TYPE member_role AS ENUM ('owner', 'member');

CREATE TYPE category_kind AS ENUM ('income', 'expense');

CREATE TYPE account_kind AS ENUM ('checking', 'savings', 'cash');

CREATE TYPE entry_kind AS ENUM ('opening', 'posting', 'reversal');

CREATE TYPE notification_kind AS ENUM ('transaction', 'income');
";

const USERS_SQL: &str = r"
CREATE TABLE users (
    id              UUID PRIMARY KEY,
    email           VARCHAR(255) NOT NULL,
    name            VARCHAR(255) NOT NULL,
    role            user_role NOT NULL DEFAULT 'user',
    birthdate       DATE,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE UNIQUE INDEX idx_users_email_lower ON users (LOWER(email));
";

const GROUPS_SQL: &str = r"
CREATE TABLE groups (
    id              UUID PRIMARY KEY,
    name            VARCHAR(255) NOT NULL,
    created_by      UUID NOT NULL REFERENCES users(id),
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
";

const USER_GROUPS_SQL: &str = r"
CREATE TABLE user_groups (
    user_id         UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    group_id        UUID NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
    role            member_role NOT NULL DEFAULT 'member',
    joined_at       TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (user_id, group_id)
);

-- Exactly one owner per group
CREATE UNIQUE INDEX idx_user_groups_single_owner
    ON user_groups (group_id) WHERE role = 'owner';

CREATE INDEX idx_user_groups_group ON user_groups (group_id);
";

const CATEGORIES_SQL: &str = r"
CREATE TABLE categories (
    id              UUID PRIMARY KEY,
    title           VARCHAR(255) NOT NULL,
    kind            category_kind NOT NULL
);
";

const ACCOUNTS_SQL: &str = r"
CREATE TABLE accounts (
    id                  UUID PRIMARY KEY,
    group_id            UUID NOT NULL REFERENCES groups(id),
    owner_id            UUID NOT NULL REFERENCES users(id),
    title               VARCHAR(255) NOT NULL,
    kind                account_kind NOT NULL,
    currency            VARCHAR(3) NOT NULL,
    overdraft_allowed   BOOLEAN NOT NULL DEFAULT FALSE,
    balance             NUMERIC(19, 4) NOT NULL DEFAULT 0,
    version             BIGINT NOT NULL DEFAULT 0,
    opened_at           TIMESTAMPTZ NOT NULL DEFAULT NOW(),

    CONSTRAINT chk_accounts_version CHECK (version >= 0),
    CONSTRAINT chk_accounts_balance_policy CHECK (
        balance >= 0 OR (kind = 'checking' AND overdraft_allowed)
    )
);

CREATE INDEX idx_accounts_owner ON accounts (owner_id);
CREATE INDEX idx_accounts_group ON accounts (group_id);
";

const ACCOUNTS_GROUPS_SQL: &str = r"
CREATE TABLE accounts_groups (
    account_id      UUID NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
    group_id        UUID NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
    PRIMARY KEY (account_id, group_id)
);
";

const GOALS_SQL: &str = r"
CREATE TABLE goals (
    id              UUID PRIMARY KEY,
    group_id        UUID NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
    created_by      UUID NOT NULL REFERENCES users(id),
    title           VARCHAR(255) NOT NULL,
    description     TEXT,
    target_amount   NUMERIC(19, 4) NOT NULL,
    currency        VARCHAR(3) NOT NULL,
    starts_on       DATE NOT NULL,
    target_date     DATE NOT NULL,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),

    CONSTRAINT chk_goals_target_positive CHECK (target_amount > 0),
    CONSTRAINT chk_goals_window CHECK (target_date >= starts_on)
);

CREATE INDEX idx_goals_group ON goals (group_id);
";

const JOURNAL_ENTRIES_SQL: &str = r#"
CREATE TABLE journal_entries (
    "offset"        BIGINT PRIMARY KEY,
    transaction_id  UUID NOT NULL UNIQUE,
    kind            entry_kind NOT NULL,
    reverses        UUID REFERENCES journal_entries(transaction_id),
    amount          NUMERIC(19, 4) NOT NULL,
    currency        VARCHAR(3) NOT NULL,
    category_id     UUID REFERENCES categories(id),
    goal_id         UUID REFERENCES goals(id),
    user_id         UUID NOT NULL REFERENCES users(id),
    occurred_at     TIMESTAMPTZ NOT NULL,
    memo            TEXT,

    CONSTRAINT chk_journal_offset CHECK ("offset" >= 0),
    CONSTRAINT chk_journal_reversal CHECK ((kind = 'reversal') = (reverses IS NOT NULL))
);

-- A transaction is reversed at most once
CREATE UNIQUE INDEX idx_journal_single_reversal
    ON journal_entries (reverses) WHERE reverses IS NOT NULL;

CREATE INDEX idx_journal_user ON journal_entries (user_id, occurred_at);
CREATE INDEX idx_journal_goal ON journal_entries (goal_id) WHERE goal_id IS NOT NULL;
"#;

const JOURNAL_LEGS_SQL: &str = r#"
CREATE TABLE journal_legs (
    entry_offset    BIGINT NOT NULL REFERENCES journal_entries("offset") ON DELETE CASCADE,
    account_id      UUID NOT NULL REFERENCES accounts(id),
    amount          NUMERIC(19, 4) NOT NULL,
    causal_version  BIGINT NOT NULL,
    position        INTEGER NOT NULL CHECK (position >= 0),
    PRIMARY KEY (entry_offset, account_id),
    UNIQUE (entry_offset, position)
);

CREATE INDEX idx_journal_legs_account ON journal_legs (account_id, entry_offset);
"#;

const JOURNAL_TRIGGERS_SQL: &str = r"
-- The journal is append-only
CREATE OR REPLACE FUNCTION prevent_journal_mutation()
RETURNS TRIGGER AS $$
BEGIN
    RAISE EXCEPTION 'journal rows are append-only (% on %)', TG_OP, TG_TABLE_NAME;
END;
$$ LANGUAGE plpgsql;

CREATE TRIGGER trg_journal_entries_append_only
    BEFORE UPDATE OR DELETE ON journal_entries
    FOR EACH ROW EXECUTE FUNCTION prevent_journal_mutation();

CREATE TRIGGER trg_journal_legs_append_only
    BEFORE UPDATE OR DELETE ON journal_legs
    FOR EACH ROW EXECUTE FUNCTION prevent_journal_mutation();
";

const NOTIFICATIONS_SQL: &str = r"
CREATE TABLE notifications (
    id              UUID PRIMARY KEY,
    user_id         UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    title           VARCHAR(255) NOT NULL,
    message         TEXT NOT NULL,
    kind            notification_kind NOT NULL,
    transaction_id  UUID,
    is_read         BOOLEAN NOT NULL DEFAULT FALSE,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX idx_notifications_user_unread ON notifications (user_id) WHERE NOT is_read;
";

const DROP_ALL_SQL: &str = r"
DROP TABLE IF EXISTS notifications CASCADE;
DROP TABLE IF EXISTS journal_legs CASCADE;
DROP TABLE IF EXISTS journal_entries CASCADE;
DROP TABLE IF EXISTS goals CASCADE;
DROP TABLE IF EXISTS accounts_groups CASCADE;
DROP TABLE IF EXISTS accounts CASCADE;
DROP TABLE IF EXISTS categories CASCADE;
DROP TABLE IF EXISTS user_groups CASCADE;
DROP TABLE IF EXISTS groups CASCADE;
DROP TABLE IF EXISTS users CASCADE;

DROP FUNCTION IF EXISTS prevent_journal_mutation() CASCADE;

DROP TYPE IF EXISTS notification_kind;
DROP TYPE IF EXISTS entry_kind;
DROP TYPE IF EXISTS account_kind;
DROP TYPE IF EXISTS category_kind;
DROP TYPE IF EXISTS member_role;
DROP TYPE IF EXISTS user_role;
";
