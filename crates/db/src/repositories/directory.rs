//! Directory repository: users, groups, memberships, categories and
//! account-to-group links.

use hearth_core::directory::{Category, Group, Membership, User};
use hearth_shared::types::{AccountId, GroupId, UserId};
use sea_orm::sea_query::{Expr, Func};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, JoinType,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, RelationTrait, Set,
};

use crate::entities::{accounts, accounts_groups, categories, groups, user_groups, users};

/// Repository persisting the household directory.
#[derive(Debug, Clone)]
pub struct DirectoryRepository {
    db: DatabaseConnection,
}

impl DirectoryRepository {
    /// Creates a new directory repository.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Persists a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails (e.g. the email is taken).
    pub async fn save_user(&self, user: &User) -> Result<users::Model, DbErr> {
        users::ActiveModel {
            id: Set(user.id.into_inner()),
            email: Set(user.email.clone()),
            name: Set(user.name.clone()),
            role: Set(user.role.into()),
            birthdate: Set(user.birthdate),
            created_at: Set(user.created_at.into()),
        }
        .insert(&self.db)
        .await
    }

    /// Finds a user by email, ignoring case.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<users::Model>, DbErr> {
        users::Entity::find()
            .filter(Expr::expr(Func::lower(Expr::col(users::Column::Email))).eq(email.to_lowercase()))
            .one(&self.db)
            .await
    }

    /// Counts registered users.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn user_count(&self) -> Result<u64, DbErr> {
        users::Entity::find().count(&self.db).await
    }

    /// Persists a group.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn save_group(&self, group: &Group) -> Result<groups::Model, DbErr> {
        groups::ActiveModel {
            id: Set(group.id.into_inner()),
            name: Set(group.name.clone()),
            created_by: Set(group.created_by.into_inner()),
            created_at: Set(group.created_at.into()),
        }
        .insert(&self.db)
        .await
    }

    /// Persists a membership.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails, including a second owner for
    /// the same group.
    pub async fn save_membership(&self, membership: &Membership) -> Result<user_groups::Model, DbErr> {
        user_groups::ActiveModel {
            user_id: Set(membership.user_id.into_inner()),
            group_id: Set(membership.group_id.into_inner()),
            role: Set(membership.role.into()),
            joined_at: Set(membership.joined_at.into()),
        }
        .insert(&self.db)
        .await
    }

    /// Gets all groups for a user with their membership rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn groups_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<(groups::Model, user_groups::Model)>, DbErr> {
        user_groups::Entity::find()
            .filter(user_groups::Column::UserId.eq(user_id.into_inner()))
            .order_by_asc(user_groups::Column::JoinedAt)
            .find_also_related(groups::Entity)
            .all(&self.db)
            .await
            .map(|results| {
                results
                    .into_iter()
                    .filter_map(|(membership, group)| group.map(|g| (g, membership)))
                    .collect()
            })
    }

    /// Persists a category.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn save_category(&self, category: &Category) -> Result<categories::Model, DbErr> {
        categories::ActiveModel {
            id: Set(category.id.into_inner()),
            title: Set(category.title.clone()),
            kind: Set(category.kind.into()),
        }
        .insert(&self.db)
        .await
    }

    /// Links an account to a group.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails (e.g. the link already exists).
    pub async fn link_account(
        &self,
        account_id: AccountId,
        group_id: GroupId,
    ) -> Result<accounts_groups::Model, DbErr> {
        accounts_groups::ActiveModel {
            account_id: Set(account_id.into_inner()),
            group_id: Set(group_id.into_inner()),
        }
        .insert(&self.db)
        .await
    }

    /// Gets the accounts linked to a group.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn accounts_in_group(&self, group_id: GroupId) -> Result<Vec<accounts::Model>, DbErr> {
        accounts::Entity::find()
            .join(JoinType::InnerJoin, accounts::Relation::AccountsGroups.def())
            .filter(accounts_groups::Column::GroupId.eq(group_id.into_inner()))
            .order_by_asc(accounts::Column::OpenedAt)
            .all(&self.db)
            .await
    }
}
