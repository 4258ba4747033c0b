//! In-memory directory of users, groups, account links and categories.

use std::collections::BTreeSet;

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use hearth_shared::types::{AccountId, CategoryId, GroupId, UserId};

use super::error::DirectoryError;
use super::types::{Category, CategoryKind, Group, MemberRole, Membership, NewUser, User};

/// Users, groups and categories.
///
/// All maps are concurrent; no method holds a reference into one map while
/// writing to the same map.
#[derive(Debug, Default)]
pub struct Directory {
    users: DashMap<UserId, User>,
    emails: DashMap<String, UserId>,
    groups: DashMap<GroupId, Group>,
    memberships: DashMap<GroupId, Vec<Membership>>,
    account_links: DashMap<AccountId, BTreeSet<GroupId>>,
    categories: DashMap<CategoryId, Category>,
}

impl Directory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ========== Users ==========

    /// Registers a user.
    ///
    /// # Errors
    ///
    /// - `InvalidEmail` for a malformed address
    /// - `EmptyField` for a blank name
    /// - `DuplicateEmail` if the address is taken, ignoring case
    pub fn create_user(&self, input: NewUser) -> Result<User, DirectoryError> {
        let email = input.email.trim().to_string();
        if !is_valid_email(&email) {
            return Err(DirectoryError::InvalidEmail(email));
        }
        let name = input.name.trim().to_string();
        if name.is_empty() {
            return Err(DirectoryError::EmptyField("name"));
        }

        let user = User {
            id: UserId::new(),
            email,
            name,
            role: input.role,
            birthdate: input.birthdate,
            created_at: Utc::now(),
        };

        match self.emails.entry(user.email.to_lowercase()) {
            Entry::Occupied(_) => return Err(DirectoryError::DuplicateEmail(user.email)),
            Entry::Vacant(slot) => {
                slot.insert(user.id);
            }
        }
        self.users.insert(user.id, user.clone());
        tracing::debug!(user_id = %user.id, role = user.role.as_str(), "User registered");
        Ok(user)
    }

    /// Looks up a user.
    #[must_use]
    pub fn user(&self, id: UserId) -> Option<User> {
        self.users.get(&id).map(|u| u.value().clone())
    }

    /// Looks up a user by email, ignoring case.
    #[must_use]
    pub fn user_by_email(&self, email: &str) -> Option<User> {
        let id = *self.emails.get(&email.trim().to_lowercase())?;
        self.user(id)
    }

    /// Number of registered users.
    #[must_use]
    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    // ========== Groups ==========

    /// Creates a group owned by `creator`.
    ///
    /// # Errors
    ///
    /// - `EmptyField` for a blank name
    /// - `UserNotFound` if the creator is unknown
    pub fn create_group(
        &self,
        name: impl Into<String>,
        creator: UserId,
    ) -> Result<(Group, Membership), DirectoryError> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(DirectoryError::EmptyField("group name"));
        }
        if !self.users.contains_key(&creator) {
            return Err(DirectoryError::UserNotFound(creator));
        }

        let now = Utc::now();
        let group = Group {
            id: GroupId::new(),
            name,
            created_by: creator,
            created_at: now,
        };
        let owner = Membership {
            user_id: creator,
            group_id: group.id,
            role: MemberRole::Owner,
            joined_at: now,
        };
        self.groups.insert(group.id, group.clone());
        self.memberships.insert(group.id, vec![owner.clone()]);
        tracing::debug!(group_id = %group.id, owner = %creator, "Group created");
        Ok((group, owner))
    }

    /// Looks up a group.
    #[must_use]
    pub fn group(&self, id: GroupId) -> Option<Group> {
        self.groups.get(&id).map(|g| g.value().clone())
    }

    /// Adds a user to a group.
    ///
    /// # Errors
    ///
    /// - `GroupNotFound` / `UserNotFound`
    /// - `OwnerExists` when asked to add another owner
    /// - `AlreadyMember` if the user is already in the group
    pub fn add_member(
        &self,
        group_id: GroupId,
        user_id: UserId,
        role: MemberRole,
    ) -> Result<Membership, DirectoryError> {
        if !self.groups.contains_key(&group_id) {
            return Err(DirectoryError::GroupNotFound(group_id));
        }
        if !self.users.contains_key(&user_id) {
            return Err(DirectoryError::UserNotFound(user_id));
        }
        if role == MemberRole::Owner {
            return Err(DirectoryError::OwnerExists(group_id));
        }

        let mut members = self.memberships.entry(group_id).or_default();
        if members.iter().any(|m| m.user_id == user_id) {
            return Err(DirectoryError::AlreadyMember { user_id, group_id });
        }
        let membership = Membership {
            user_id,
            group_id,
            role,
            joined_at: Utc::now(),
        };
        members.push(membership.clone());
        Ok(membership)
    }

    /// Members of a group in join order.
    #[must_use]
    pub fn members(&self, group_id: GroupId) -> Vec<Membership> {
        self.memberships
            .get(&group_id)
            .map(|m| m.value().clone())
            .unwrap_or_default()
    }

    /// The owner of a group.
    #[must_use]
    pub fn owner_of(&self, group_id: GroupId) -> Option<UserId> {
        self.memberships
            .get(&group_id)?
            .iter()
            .find(|m| m.role == MemberRole::Owner)
            .map(|m| m.user_id)
    }

    /// Groups a user belongs to, with their membership, oldest group first.
    #[must_use]
    pub fn groups_for_user(&self, user_id: UserId) -> Vec<(Group, Membership)> {
        let memberships: Vec<Membership> = self
            .memberships
            .iter()
            .filter_map(|entry| entry.value().iter().find(|m| m.user_id == user_id).cloned())
            .collect();

        let mut groups: Vec<(Group, Membership)> = memberships
            .into_iter()
            .filter_map(|m| self.group(m.group_id).map(|g| (g, m)))
            .collect();
        groups.sort_by_key(|(g, _)| (g.created_at, g.id));
        groups
    }

    // ========== Account links ==========

    /// Links an account to a group.
    ///
    /// # Errors
    ///
    /// - `GroupNotFound` if the group is unknown
    /// - `AlreadyLinked` if the link exists
    pub fn link_account(&self, account_id: AccountId, group_id: GroupId) -> Result<(), DirectoryError> {
        if !self.groups.contains_key(&group_id) {
            return Err(DirectoryError::GroupNotFound(group_id));
        }
        if !self.account_links.entry(account_id).or_default().insert(group_id) {
            return Err(DirectoryError::AlreadyLinked {
                account_id,
                group_id,
            });
        }
        Ok(())
    }

    /// Groups an account is linked to.
    #[must_use]
    pub fn groups_for_account(&self, account_id: AccountId) -> Vec<Group> {
        let ids: Vec<GroupId> = self
            .account_links
            .get(&account_id)
            .map(|links| links.iter().copied().collect())
            .unwrap_or_default();
        ids.into_iter().filter_map(|id| self.group(id)).collect()
    }

    /// Accounts linked to a group.
    #[must_use]
    pub fn accounts_in_group(&self, group_id: GroupId) -> Vec<AccountId> {
        let mut accounts: Vec<AccountId> = self
            .account_links
            .iter()
            .filter(|entry| entry.value().contains(&group_id))
            .map(|entry| *entry.key())
            .collect();
        accounts.sort_unstable();
        accounts
    }

    // ========== Categories ==========

    /// Creates a category.
    ///
    /// # Errors
    ///
    /// Returns `EmptyField` for a blank title.
    pub fn create_category(
        &self,
        title: impl Into<String>,
        kind: CategoryKind,
    ) -> Result<Category, DirectoryError> {
        let title = title.into().trim().to_string();
        if title.is_empty() {
            return Err(DirectoryError::EmptyField("category title"));
        }
        let category = Category {
            id: CategoryId::new(),
            title,
            kind,
        };
        self.categories.insert(category.id, category.clone());
        Ok(category)
    }

    /// Looks up a category.
    #[must_use]
    pub fn category(&self, id: CategoryId) -> Option<Category> {
        self.categories.get(&id).map(|c| c.value().clone())
    }

    /// Every category, ordered by title.
    #[must_use]
    pub fn categories(&self) -> Vec<Category> {
        let mut categories: Vec<Category> =
            self.categories.iter().map(|c| c.value().clone()).collect();
        categories.sort_by(|a, b| a.title.cmp(&b.title));
        categories
    }
}

fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace)
}
