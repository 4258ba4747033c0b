//! Goal repository.
//!
//! Only goal definitions are stored; progress is always derived from the
//! journal.

use hearth_core::goal::Goal;
use hearth_shared::types::{GoalId, GroupId};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set,
};

use crate::entities::goals;

/// Repository persisting savings goal definitions.
#[derive(Debug, Clone)]
pub struct GoalRepository {
    db: DatabaseConnection,
}

impl GoalRepository {
    /// Creates a new goal repository.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Persists a newly created goal.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn save(&self, goal: &Goal) -> Result<goals::Model, DbErr> {
        goals::ActiveModel {
            id: Set(goal.id.into_inner()),
            group_id: Set(goal.group_id.into_inner()),
            created_by: Set(goal.created_by.into_inner()),
            title: Set(goal.title.clone()),
            description: Set(goal.description.clone()),
            target_amount: Set(goal.target.amount),
            currency: Set(goal.target.currency.to_string()),
            starts_on: Set(goal.starts_on),
            target_date: Set(goal.target_date),
            created_at: Set(goal.created_at.into()),
        }
        .insert(&self.db)
        .await
    }

    /// Writes back the editable fields of a goal.
    ///
    /// Returns `false` if no such goal is stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn update(&self, goal: &Goal) -> Result<bool, DbErr> {
        let result = goals::Entity::update_many()
            .col_expr(goals::Column::Title, Expr::value(goal.title.clone()))
            .col_expr(goals::Column::Description, Expr::value(goal.description.clone()))
            .col_expr(goals::Column::TargetDate, Expr::value(goal.target_date))
            .filter(goals::Column::Id.eq(goal.id.into_inner()))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Finds a goal by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn find_by_id(&self, id: GoalId) -> Result<Option<goals::Model>, DbErr> {
        goals::Entity::find_by_id(id.into_inner()).one(&self.db).await
    }

    /// Gets the goals of a group, earliest deadline first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn find_by_group(&self, group_id: GroupId) -> Result<Vec<goals::Model>, DbErr> {
        goals::Entity::find()
            .filter(goals::Column::GroupId.eq(group_id.into_inner()))
            .order_by_asc(goals::Column::TargetDate)
            .all(&self.db)
            .await
    }
}
