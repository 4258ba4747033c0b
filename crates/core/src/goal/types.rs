//! Goal data types.

use chrono::{DateTime, NaiveDate, Utc};
use hearth_shared::types::{GoalId, GroupId, Money, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ledger::JournalOffset;

/// A savings goal.
///
/// Only the descriptive fields are stored; progress is derived from the
/// journal on every read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goal {
    /// Goal ID.
    pub id: GoalId,
    /// Group the goal belongs to.
    pub group_id: GroupId,
    /// User who created the goal.
    pub created_by: UserId,
    /// Goal title.
    pub title: String,
    /// Optional description.
    pub description: Option<String>,
    /// Amount to save.
    pub target: Money,
    /// First day contributions count.
    pub starts_on: NaiveDate,
    /// Last day contributions count.
    pub target_date: NaiveDate,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Goal {
    /// Returns true if `date` lies in the goal's active window.
    #[must_use]
    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        date >= self.starts_on && date <= self.target_date
    }
}

/// Input for creating a goal.
#[derive(Debug, Clone)]
pub struct NewGoal {
    /// Group the goal belongs to.
    pub group_id: GroupId,
    /// Creating user.
    pub created_by: UserId,
    /// Goal title.
    pub title: String,
    /// Optional description.
    pub description: Option<String>,
    /// Amount to save.
    pub target: Money,
    /// First day contributions count.
    pub starts_on: NaiveDate,
    /// Last day contributions count.
    pub target_date: NaiveDate,
}

impl NewGoal {
    /// Creates an input without description.
    #[must_use]
    pub fn new(
        group_id: GroupId,
        created_by: UserId,
        title: impl Into<String>,
        target: Money,
        starts_on: NaiveDate,
        target_date: NaiveDate,
    ) -> Self {
        Self {
            group_id,
            created_by,
            title: title.into(),
            description: None,
            target,
            starts_on,
            target_date,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Editable goal fields; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct GoalUpdate {
    /// New title.
    pub title: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New target date.
    pub target_date: Option<NaiveDate>,
}

/// Derived progress of a goal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalProgress {
    /// Goal ID.
    pub goal_id: GoalId,
    /// Sum of contributions in the active window.
    pub current: Money,
    /// Target amount.
    pub target: Money,
    /// Progress in percent, two decimal places, not capped at 100.
    pub pct_complete: Decimal,
    /// Number of journal entries counted.
    pub contributions: usize,
    /// Journal watermark the progress was computed at.
    pub as_of: JournalOffset,
}

impl GoalProgress {
    /// Returns true once the target is reached.
    #[must_use]
    pub fn is_achieved(&self) -> bool {
        self.current.amount >= self.target.amount
    }

    /// Amount still missing; zero once achieved.
    #[must_use]
    pub fn remaining(&self) -> Money {
        let zero = Money::zero(self.target.currency);
        if self.is_achieved() {
            return zero;
        }
        self.target.checked_sub(&self.current).unwrap_or(zero)
    }
}
