//! Goal tracker: goal definitions plus journal-derived progress.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use hearth_shared::types::{GoalId, GroupId, Money, TransactionId, UserId};
use moka::sync::Cache;
use rust_decimal::Decimal;

use super::types::{Goal, GoalProgress, GoalUpdate, NewGoal};
use crate::ledger::{EntryKind, JournalEntry, LedgerError, TransactionJournal};

/// Stores goals and computes their progress from the journal.
///
/// Progress is memoised per goal and recomputed as soon as the journal's
/// committed offset has moved past the cached value.
pub struct GoalTracker {
    journal: Arc<TransactionJournal>,
    goals: DashMap<GoalId, Goal>,
    cache: Cache<GoalId, Arc<GoalProgress>>,
}

impl std::fmt::Debug for GoalTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoalTracker")
            .field("goals", &self.goals.len())
            .field("cached", &self.cache.entry_count())
            .finish_non_exhaustive()
    }
}

impl GoalTracker {
    /// Creates a tracker over `journal` with a bounded progress cache.
    #[must_use]
    pub fn new(journal: Arc<TransactionJournal>, cache_capacity: u64) -> Self {
        Self {
            journal,
            goals: DashMap::new(),
            cache: Cache::new(cache_capacity),
        }
    }

    /// Creates a goal.
    ///
    /// # Errors
    ///
    /// Returns `InvalidGoal` for an empty title, a non-positive target, or a
    /// target date before the start date.
    pub fn create(&self, input: NewGoal) -> Result<Goal, LedgerError> {
        if input.title.trim().is_empty() {
            return Err(LedgerError::InvalidGoal("title cannot be empty".to_string()));
        }
        if !input.target.is_positive() {
            return Err(LedgerError::InvalidGoal(format!(
                "target must be positive, got {}",
                input.target
            )));
        }
        if input.target_date < input.starts_on {
            return Err(LedgerError::InvalidGoal(format!(
                "target date {} is before start date {}",
                input.target_date, input.starts_on
            )));
        }

        let goal = Goal {
            id: GoalId::new(),
            group_id: input.group_id,
            created_by: input.created_by,
            title: input.title,
            description: input.description,
            target: input.target,
            starts_on: input.starts_on,
            target_date: input.target_date,
            created_at: Utc::now(),
        };
        self.goals.insert(goal.id, goal.clone());
        tracing::info!(goal_id = %goal.id, group_id = %goal.group_id, target = %goal.target, "Goal created");
        Ok(goal)
    }

    /// Looks up a goal.
    #[must_use]
    pub fn get(&self, id: GoalId) -> Option<Goal> {
        self.goals.get(&id).map(|g| g.value().clone())
    }

    /// Edits the descriptive fields of a goal.
    ///
    /// # Errors
    ///
    /// Returns `GoalNotFound` or `InvalidGoal`.
    pub fn update(&self, id: GoalId, update: GoalUpdate) -> Result<Goal, LedgerError> {
        let mut goal = self
            .goals
            .get_mut(&id)
            .ok_or(LedgerError::GoalNotFound(id))?;

        if let Some(title) = &update.title
            && title.trim().is_empty()
        {
            return Err(LedgerError::InvalidGoal("title cannot be empty".to_string()));
        }
        if let Some(target_date) = update.target_date
            && target_date < goal.starts_on
        {
            return Err(LedgerError::InvalidGoal(format!(
                "target date {target_date} is before start date {}",
                goal.starts_on
            )));
        }

        if let Some(title) = update.title {
            goal.title = title;
        }
        if let Some(description) = update.description {
            goal.description = Some(description);
        }
        if let Some(target_date) = update.target_date {
            goal.target_date = target_date;
            self.cache.invalidate(&id);
        }
        Ok(goal.clone())
    }

    /// Goals of a group, oldest first.
    #[must_use]
    pub fn for_group(&self, group_id: GroupId) -> Vec<Goal> {
        self.collect(|goal| goal.group_id == group_id)
    }

    /// Goals created by a user, oldest first.
    #[must_use]
    pub fn created_by(&self, user_id: UserId) -> Vec<Goal> {
        self.collect(|goal| goal.created_by == user_id)
    }

    fn collect(&self, filter: impl Fn(&Goal) -> bool) -> Vec<Goal> {
        let mut goals: Vec<Goal> = self
            .goals
            .iter()
            .filter(|g| filter(g.value()))
            .map(|g| g.value().clone())
            .collect();
        goals.sort_by_key(|g| (g.created_at, g.id));
        goals
    }

    /// Progress of a goal at the latest committed journal offset.
    ///
    /// # Errors
    ///
    /// Returns `GoalNotFound` if the goal does not exist.
    pub fn progress(&self, id: GoalId) -> Result<Arc<GoalProgress>, LedgerError> {
        let goal = self.get(id).ok_or(LedgerError::GoalNotFound(id))?;

        if let Some(cached) = self.cache.get(&id)
            && cached.as_of == self.journal.committed_offset()
        {
            return Ok(cached);
        }

        let (as_of, entries) = self.journal.tagged_to(id);
        let progress = Arc::new(compute(&goal, as_of, &entries));
        self.cache.insert(id, Arc::clone(&progress));
        Ok(progress)
    }
}

/// Sums the contributions of `entries` that fall in the goal's window.
///
/// A reversal is placed on the date of the entry it reverses, so it always
/// lands in the same window as what it cancels.
fn compute(
    goal: &Goal,
    as_of: crate::ledger::JournalOffset,
    entries: &[Arc<JournalEntry>],
) -> GoalProgress {
    let posted_at: HashMap<TransactionId, DateTime<Utc>> = entries
        .iter()
        .map(|entry| (entry.transaction_id, entry.timestamp))
        .collect();

    let mut current = Money::zero(goal.target.currency);
    let mut contributions = 0;
    for entry in entries {
        let effective = match entry.kind {
            EntryKind::Reversal { reverses } => {
                posted_at.get(&reverses).copied().unwrap_or(entry.timestamp)
            }
            EntryKind::Opening | EntryKind::Posting => entry.timestamp,
        };
        if !goal.is_active_on(effective.date_naive()) {
            continue;
        }
        match current.checked_add(&entry.amount) {
            Ok(sum) => {
                current = sum;
                contributions += 1;
            }
            Err(e) => {
                tracing::warn!(
                    goal_id = %goal.id,
                    transaction_id = %entry.transaction_id,
                    error = %e,
                    "Skipping goal contribution"
                );
            }
        }
    }

    let pct_complete = current
        .amount
        .checked_div(goal.target.amount)
        .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
        .map_or(Decimal::ZERO, |pct| pct.round_dp(2));

    GoalProgress {
        goal_id: goal.id,
        current,
        target: goal.target,
        pct_complete,
        contributions,
        as_of,
    }
}
