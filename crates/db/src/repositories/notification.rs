//! Notification repository.

use hearth_core::notification::Notification;
use hearth_shared::types::{NotificationId, UserId};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set,
};

use crate::entities::notifications;

/// Repository persisting user notifications.
#[derive(Debug, Clone)]
pub struct NotificationRepository {
    db: DatabaseConnection,
}

impl NotificationRepository {
    /// Creates a new notification repository.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Persists a notification.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn save(&self, notification: &Notification) -> Result<notifications::Model, DbErr> {
        notifications::ActiveModel {
            id: Set(notification.id.into_inner()),
            user_id: Set(notification.user_id.into_inner()),
            title: Set(notification.title.clone()),
            message: Set(notification.message.clone()),
            kind: Set(notification.kind.into()),
            transaction_id: Set(notification.transaction_id.map(Into::into)),
            is_read: Set(notification.is_read),
            created_at: Set(notification.created_at.into()),
        }
        .insert(&self.db)
        .await
    }

    /// Gets a user's unread notifications, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn unread_for(&self, user_id: UserId) -> Result<Vec<notifications::Model>, DbErr> {
        notifications::Entity::find()
            .filter(notifications::Column::UserId.eq(user_id.into_inner()))
            .filter(notifications::Column::IsRead.eq(false))
            .order_by_desc(notifications::Column::CreatedAt)
            .all(&self.db)
            .await
    }

    /// Marks a notification as read.
    ///
    /// Returns `false` if it does not belong to the user or was already read.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn mark_read(&self, user_id: UserId, id: NotificationId) -> Result<bool, DbErr> {
        let result = notifications::Entity::update_many()
            .col_expr(notifications::Column::IsRead, Expr::value(true))
            .filter(notifications::Column::Id.eq(id.into_inner()))
            .filter(notifications::Column::UserId.eq(user_id.into_inner()))
            .filter(notifications::Column::IsRead.eq(false))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }
}
