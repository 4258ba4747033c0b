//! Read projections.
//!
//! Each projection states the joins it performs. They read committed state
//! only and never block postings.

use hearth_shared::types::{GroupId, UserId};
use serde::Serialize;

use crate::directory::{Category, DirectoryError, Group, MemberRole, User};
use crate::engine::{EngineResult, LedgerEngine};
use crate::goal::{Goal, GoalProgress};
use crate::ledger::{Account, JournalEntry, Transaction};
use crate::notification::Notification;

/// A group the user belongs to.
#[derive(Debug, Clone, Serialize)]
pub struct MembershipView {
    /// The group.
    pub group: Group,
    /// The user's role in it.
    pub role: MemberRole,
}

/// A transaction leg with its account, category and group resolved.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionView {
    /// The leg.
    pub transaction: Transaction,
    /// Title of the account it touched.
    pub account_title: Option<String>,
    /// Category, if any.
    pub category: Option<Category>,
    /// Group the account was opened in.
    pub group: Option<Group>,
}

/// An account with the groups it is linked to.
#[derive(Debug, Clone, Serialize)]
pub struct AccountView {
    /// The account.
    pub account: Account,
    /// Linked groups.
    pub groups: Vec<Group>,
}

/// A goal with its group and derived progress.
#[derive(Debug, Clone, Serialize)]
pub struct GoalView {
    /// The goal.
    pub goal: Goal,
    /// Group the goal belongs to.
    pub group: Option<Group>,
    /// Derived progress.
    pub progress: Option<GoalProgress>,
}

/// Everything about one user.
#[derive(Debug, Clone, Serialize)]
pub struct UserOverview {
    /// The user.
    pub user: User,
    /// Group memberships.
    pub groups: Vec<MembershipView>,
    /// Legs posted by the user, newest first.
    pub transactions: Vec<TransactionView>,
    /// Accounts owned by the user.
    pub accounts: Vec<AccountView>,
    /// Unread notifications, newest first.
    pub unread_notifications: Vec<Notification>,
    /// Goals created by the user.
    pub goals: Vec<GoalView>,
}

/// A group member.
#[derive(Debug, Clone, Serialize)]
pub struct MemberView {
    /// User ID.
    pub id: UserId,
    /// Display name.
    pub name: String,
    /// Email.
    pub email: String,
    /// Role in the group.
    pub role: MemberRole,
}

/// A leg on a group account with its category.
#[derive(Debug, Clone, Serialize)]
pub struct GroupTransactionView {
    /// The leg.
    pub transaction: Transaction,
    /// Category, if any.
    pub category: Option<Category>,
}

/// Counts shown with a group summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GroupCounts {
    /// Number of members.
    pub members: usize,
    /// Number of transaction legs on linked accounts.
    pub transactions: usize,
    /// Number of goals.
    pub goals: usize,
}

/// Everything about one group.
#[derive(Debug, Clone, Serialize)]
pub struct GroupSummary {
    /// The group.
    pub group: Group,
    /// Members in join order.
    pub members: Vec<MemberView>,
    /// Legs on accounts linked to the group, newest first.
    pub transactions: Vec<GroupTransactionView>,
    /// Goals of the group.
    pub goals: Vec<GoalView>,
    /// Counts.
    pub counts: GroupCounts,
}

/// Builds a user's overview.
///
/// Joins: user -> memberships -> groups; user -> journal entries posted by
/// the user -> account, category, account group; user -> owned accounts ->
/// linked groups; user -> unread notifications; user -> created goals ->
/// group, progress.
///
/// # Errors
///
/// Returns `UserNotFound` if the user does not exist.
pub fn user_overview(engine: &LedgerEngine, user_id: UserId) -> EngineResult<UserOverview> {
    let directory = engine.directory();
    let user = directory
        .user(user_id)
        .ok_or(DirectoryError::UserNotFound(user_id))?;

    let groups = directory
        .groups_for_user(user_id)
        .into_iter()
        .map(|(group, membership)| MembershipView {
            group,
            role: membership.role,
        })
        .collect();

    let snapshot = engine.ledger().snapshot();
    let mut entries: Vec<_> = engine
        .journal()
        .committed_entries()
        .into_iter()
        .filter(|entry| entry.user_id == user_id)
        .collect();
    newest_first(&mut entries);
    let transactions = entries
        .iter()
        .flat_map(|entry| entry.transactions())
        .map(|transaction| {
            let account = snapshot.account(transaction.account_id);
            TransactionView {
                account_title: account.map(|a| a.title.clone()),
                category: transaction.category_id.and_then(|id| directory.category(id)),
                group: account.and_then(|a| directory.group(a.group_id)),
                transaction,
            }
        })
        .collect();

    let mut owned: Vec<&Account> = snapshot.accounts().filter(|a| a.owner == user_id).collect();
    owned.sort_by_key(|a| (a.opened_at, a.id));
    let accounts = owned
        .into_iter()
        .map(|account| AccountView {
            groups: directory.groups_for_account(account.id),
            account: account.clone(),
        })
        .collect();

    let goals = engine
        .goals()
        .created_by(user_id)
        .into_iter()
        .map(|goal| goal_view(engine, goal))
        .collect();

    Ok(UserOverview {
        user,
        groups,
        transactions,
        accounts,
        unread_notifications: engine.notifications().unread(user_id),
        goals,
    })
}

/// Builds a group's summary.
///
/// Joins: group -> memberships -> users (id, name, email); group -> linked
/// accounts -> journal legs -> category; group -> goals -> progress.
///
/// # Errors
///
/// Returns `GroupNotFound` if the group does not exist.
pub fn group_summary(engine: &LedgerEngine, group_id: GroupId) -> EngineResult<GroupSummary> {
    let directory = engine.directory();
    let group = directory
        .group(group_id)
        .ok_or(DirectoryError::GroupNotFound(group_id))?;

    let members: Vec<MemberView> = directory
        .members(group_id)
        .into_iter()
        .filter_map(|membership| {
            directory.user(membership.user_id).map(|user| MemberView {
                id: user.id,
                name: user.name,
                email: user.email,
                role: membership.role,
            })
        })
        .collect();

    let linked = directory.accounts_in_group(group_id);
    let mut entries: Vec<_> = engine
        .journal()
        .committed_entries()
        .into_iter()
        .filter(|entry| linked.iter().any(|id| entry.touches(*id)))
        .collect();
    newest_first(&mut entries);
    let transactions: Vec<GroupTransactionView> = entries
        .iter()
        .flat_map(|entry| entry.transactions())
        .filter(|transaction| linked.contains(&transaction.account_id))
        .map(|transaction| GroupTransactionView {
            category: transaction.category_id.and_then(|id| directory.category(id)),
            transaction,
        })
        .collect();

    let goals: Vec<GoalView> = engine
        .goals()
        .for_group(group_id)
        .into_iter()
        .map(|goal| goal_view(engine, goal))
        .collect();

    let counts = GroupCounts {
        members: members.len(),
        transactions: transactions.len(),
        goals: goals.len(),
    };
    Ok(GroupSummary {
        group,
        members,
        transactions,
        goals,
        counts,
    })
}

fn goal_view(engine: &LedgerEngine, goal: Goal) -> GoalView {
    GoalView {
        group: engine.directory().group(goal.group_id),
        progress: engine
            .goals()
            .progress(goal.id)
            .ok()
            .map(|p| GoalProgress::clone(&p)),
        goal,
    }
}

fn newest_first(entries: &mut [std::sync::Arc<JournalEntry>]) {
    entries.sort_by(|a, b| (b.timestamp, b.offset).cmp(&(a.timestamp, a.offset)));
}
