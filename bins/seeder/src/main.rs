//! Demo data seeder for Hearth development and testing.
//!
//! Seeds three users, two household groups, five categories, three accounts,
//! everyday postings and three savings goals with tagged contributions. All
//! money moves through the ledger engine, so balances and goal progress are
//! derived from the journal rather than written directly.
//!
//! Usage: cargo run --bin seeder

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use chrono::{DateTime, NaiveDate, Utc};
use hearth_core::LedgerEngine;
use hearth_core::directory::{Category, CategoryKind, Group, MemberRole, NewUser, User, UserRole};
use hearth_core::goal::{Goal, NewGoal};
use hearth_core::ledger::{Account, AccountKind, OpenAccount, PostingReceipt, PostingRequest};
use hearth_db::{DirectoryRepository, GoalRepository, NotificationRepository, PgLedgerStore};
use hearth_shared::AppConfig;
use hearth_shared::telemetry;
use hearth_shared::types::{Currency, GroupId, Money};
use rust_decimal::Decimal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("Failed to load configuration")?;
    telemetry::init(&config.logging);

    println!("Connecting to database...");
    let db = hearth_db::connect(&config.database)
        .await
        .context("Failed to connect to database")?;

    let directory = DirectoryRepository::new(db.clone());
    if directory.user_count().await? > 0 {
        println!("Users already exist, skipping...");
        let store = Arc::new(PgLedgerStore::new(db));
        match LedgerEngine::restore(&config.ledger, store).await {
            Ok(engine) => println!(
                "Existing ledger restored: {} accounts, journal at offset {}",
                engine.ledger().snapshot().len(),
                engine.journal().committed_offset()
            ),
            Err(e) => println!("Existing ledger could not be restored: {e}"),
        }
        return Ok(());
    }

    let engine = LedgerEngine::new(&config.ledger, Arc::new(PgLedgerStore::new(db.clone())));
    let persistence = Persistence {
        directory,
        goals: GoalRepository::new(db.clone()),
        notifications: NotificationRepository::new(db),
    };

    let seeded = Seeder::new(&engine, Some(&persistence)).run().await?;
    report(&engine, &seeded).await?;

    println!("Seeding complete!");
    Ok(())
}

/// Repositories that mirror the seeded directory into the database.
struct Persistence {
    directory: DirectoryRepository,
    goals: GoalRepository,
    notifications: NotificationRepository,
}

/// What the seeder created.
struct Seeded {
    users: Vec<User>,
    groups: Vec<Group>,
    accounts: Vec<Account>,
    goals: Vec<Goal>,
}

struct Seeder<'a> {
    engine: &'a LedgerEngine,
    persistence: Option<&'a Persistence>,
}

impl<'a> Seeder<'a> {
    fn new(engine: &'a LedgerEngine, persistence: Option<&'a Persistence>) -> Self {
        Self { engine, persistence }
    }

    async fn run(&self) -> anyhow::Result<Seeded> {
        println!("Seeding users...");
        let john = self
            .user(
                NewUser::new("john@example.com", "John Smith")
                    .with_role(UserRole::Admin)
                    .with_birthdate(date(1985, 5, 15)?),
            )
            .await?;
        let jane = self
            .user(NewUser::new("jane@example.com", "Jane Doe").with_birthdate(date(1987, 8, 22)?))
            .await?;
        let peter = self
            .user(
                NewUser::new("peter@example.com", "Peter Johnson")
                    .with_birthdate(date(1990, 12, 10)?),
            )
            .await?;

        println!("Seeding groups...");
        let family = self.group("Smith Family", &john).await?;
        self.member(&family, &jane).await?;
        let work = self.group("Work Group", &peter).await?;

        println!("Seeding categories...");
        let groceries = self.category("Groceries", CategoryKind::Expense).await?;
        let transport = self.category("Transport", CategoryKind::Expense).await?;
        let entertainment = self.category("Entertainment", CategoryKind::Expense).await?;
        let salary = self.category("Salary", CategoryKind::Income).await?;
        let freelance = self.category("Freelance", CategoryKind::Income).await?;

        println!("Seeding accounts...");
        let opened_at = at(2025, 1, 1)?;
        let main_account = self
            .account(OpenAccount {
                opened_at,
                ..OpenAccount::new(family.id, john.id, "Main Account", AccountKind::Checking, usd(50000))
            })
            .await?;
        let savings = self
            .account(OpenAccount {
                opened_at,
                ..OpenAccount::new(family.id, jane.id, "Savings Account", AccountKind::Savings, usd(150_000))
            })
            .await?;
        let cash = self
            .account(OpenAccount {
                opened_at,
                ..OpenAccount::new(work.id, peter.id, "Cash", AccountKind::Cash, usd(5000))
            })
            .await?;

        println!("Seeding transactions...");
        let everyday = [
            (john.id, main_account.id, 80000, salary.id, at(2025, 9, 1)?),
            (jane.id, savings.id, 25000, freelance.id, at(2025, 9, 15)?),
            (john.id, main_account.id, -3500, groceries.id, at(2025, 9, 20)?),
            (jane.id, main_account.id, -1200, transport.id, at(2025, 9, 22)?),
            (peter.id, cash.id, -800, entertainment.id, at(2025, 9, 25)?),
        ];
        for (user_id, account_id, amount, category_id, timestamp) in everyday {
            self.post(
                PostingRequest::single(user_id, account_id, usd(amount))
                    .with_category(category_id)
                    .at(timestamp),
            )
            .await?;
        }

        println!("Seeding goals...");
        let vacation = self
            .goal(
                NewGoal::new(
                    family.id,
                    john.id,
                    "Vacation in Turkey",
                    usd(200_000),
                    date(2025, 1, 1)?,
                    date(2025, 7, 1)?,
                )
                .with_description("Save money for a family vacation for two"),
            )
            .await?;
        let laptop = self
            .goal(
                NewGoal::new(
                    family.id,
                    jane.id,
                    "New Laptop",
                    usd(150_000),
                    date(2025, 1, 1)?,
                    date(2025, 12, 31)?,
                )
                .with_description("Saving for a MacBook Pro for work"),
            )
            .await?;
        let emergency = self
            .goal(
                NewGoal::new(
                    work.id,
                    peter.id,
                    "Emergency Fund",
                    usd(300_000),
                    date(2025, 1, 1)?,
                    date(2026, 6, 1)?,
                )
                .with_description("Reserve for 6 months"),
            )
            .await?;

        println!("Seeding goal contributions...");
        self.post(
            PostingRequest::transfer(john.id, main_account.id, savings.id, usd(45000))
                .with_goal(vacation.id)
                .with_memo("Vacation savings")
                .at(at(2025, 6, 15)?),
        )
        .await?;
        self.post(
            PostingRequest::single(jane.id, savings.id, usd(75000))
                .with_category(freelance.id)
                .with_goal(laptop.id)
                .with_memo("Laptop fund")
                .at(at(2025, 10, 1)?),
        )
        .await?;
        self.post(
            PostingRequest::single(peter.id, cash.id, usd(120_000))
                .with_category(salary.id)
                .with_goal(emergency.id)
                .with_memo("Emergency reserve")
                .at(at(2025, 11, 1)?),
        )
        .await?;

        let users = vec![john, jane, peter];
        println!("Seeding notifications...");
        self.flush_notifications(&users).await?;

        // Fetch committed state after every posting
        let accounts = [main_account.id, savings.id, cash.id]
            .into_iter()
            .map(|id| self.engine.account(id))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Seeded {
            users,
            groups: vec![family, work],
            accounts,
            goals: vec![vacation, laptop, emergency],
        })
    }

    async fn user(&self, input: NewUser) -> anyhow::Result<User> {
        let user = self.engine.directory().create_user(input)?;
        if let Some(p) = self.persistence {
            p.directory.save_user(&user).await?;
        }
        Ok(user)
    }

    async fn group(&self, name: &str, creator: &User) -> anyhow::Result<Group> {
        let (group, owner) = self.engine.directory().create_group(name, creator.id)?;
        if let Some(p) = self.persistence {
            p.directory.save_group(&group).await?;
            p.directory.save_membership(&owner).await?;
        }
        Ok(group)
    }

    async fn member(&self, group: &Group, user: &User) -> anyhow::Result<()> {
        let membership = self
            .engine
            .directory()
            .add_member(group.id, user.id, MemberRole::Member)?;
        if let Some(p) = self.persistence {
            p.directory.save_membership(&membership).await?;
        }
        Ok(())
    }

    async fn category(&self, title: &str, kind: CategoryKind) -> anyhow::Result<Category> {
        let category = self.engine.directory().create_category(title, kind)?;
        if let Some(p) = self.persistence {
            p.directory.save_category(&category).await?;
        }
        Ok(category)
    }

    async fn account(&self, input: OpenAccount) -> anyhow::Result<Account> {
        let group_id: GroupId = input.group_id;
        // The store writes the account row; only the group link is left
        let account = self.engine.open_account(input).await?;
        if let Some(p) = self.persistence {
            p.directory.link_account(account.id, group_id).await?;
        }
        Ok(account)
    }

    async fn goal(&self, input: NewGoal) -> anyhow::Result<Goal> {
        let goal = self.engine.create_goal(input)?;
        if let Some(p) = self.persistence {
            p.goals.save(&goal).await?;
        }
        Ok(goal)
    }

    async fn post(&self, request: PostingRequest) -> anyhow::Result<PostingReceipt> {
        Ok(self.engine.post(request).await?)
    }

    async fn flush_notifications(&self, users: &[User]) -> anyhow::Result<()> {
        if !self.engine.settle_notifications(Duration::from_secs(5)).await {
            tracing::warn!("Notification consumer did not catch up");
        }
        if let Some(p) = self.persistence {
            for user in users {
                for notification in self.engine.notifications().all_for(user.id) {
                    p.notifications.save(&notification).await?;
                }
            }
        }
        Ok(())
    }
}

/// Audits the seeded ledger and prints the read projections.
async fn report(engine: &LedgerEngine, seeded: &Seeded) -> anyhow::Result<()> {
    let reconciliation = engine.reconcile().await;
    if !reconciliation.is_consistent() {
        bail!(
            "ledger does not match journal: {:?}",
            reconciliation.mismatches
        );
    }

    println!(
        "Created users: {}, groups: {}, accounts: {}, goals: {}, journal entries: {}",
        seeded.users.len(),
        seeded.groups.len(),
        seeded.accounts.len(),
        seeded.goals.len(),
        engine.journal().len()
    );
    for account in &seeded.accounts {
        println!("  {}: {} (version {})", account.title, account.balance, account.version);
    }
    for goal in &seeded.goals {
        let progress = engine.goal_progress(goal.id)?;
        println!(
            "  {}: {} of {} ({}%)",
            goal.title, progress.current, progress.target, progress.pct_complete
        );
    }

    if let Some(user) = seeded.users.first() {
        let overview = engine.user_overview(user.id)?;
        println!("User overview:\n{}", serde_json::to_string_pretty(&overview)?);
    }
    if let Some(group) = seeded.groups.first() {
        let summary = engine.group_summary(group.id)?;
        println!("Group summary:\n{}", serde_json::to_string_pretty(&summary)?);
    }
    Ok(())
}

fn usd(amount: i64) -> Money {
    Money::new(Decimal::from(amount), Currency::Usd)
}

fn date(year: i32, month: u32, day: u32) -> anyhow::Result<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day)
        .with_context(|| format!("invalid date {year}-{month}-{day}"))
}

fn at(year: i32, month: u32, day: u32) -> anyhow::Result<DateTime<Utc>> {
    Ok(date(year, month, day)?
        .and_hms_opt(12, 0, 0)
        .context("invalid time")?
        .and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_shared::config::LedgerConfig;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_seed_in_memory() {
        let engine = LedgerEngine::in_memory(&LedgerConfig::default());
        let seeded = Seeder::new(&engine, None).run().await.unwrap();

        let balances: Vec<_> = seeded.accounts.iter().map(|a| a.balance.amount).collect();
        assert_eq!(balances, vec![dec!(80300), dec!(295000), dec!(124200)]);

        let pct: Vec<_> = seeded
            .goals
            .iter()
            .map(|g| engine.goal_progress(g.id).unwrap().pct_complete)
            .collect();
        assert_eq!(pct, vec![dec!(22.5), dec!(50), dec!(40)]);

        // 3 openings + 5 everyday postings + 3 contributions
        assert_eq!(engine.journal().len(), 11);
        assert!(engine.reconcile().await.is_consistent());
        report(&engine, &seeded).await.unwrap();
    }

    #[tokio::test]
    async fn test_seed_twice_fails_on_duplicate_email() {
        let engine = LedgerEngine::in_memory(&LedgerConfig::default());
        Seeder::new(&engine, None).run().await.unwrap();
        assert!(Seeder::new(&engine, None).run().await.is_err());
    }

    #[test]
    fn test_invalid_date_is_an_error() {
        assert!(date(2025, 2, 30).is_err());
        assert!(at(2025, 9, 1).is_ok());
    }
}
