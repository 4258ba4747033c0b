//! `SeaORM` Entity for accounts table.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::sea_orm_active_enums::AccountKind;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "accounts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub group_id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub kind: AccountKind,
    pub currency: String,
    pub overdraft_allowed: bool,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub balance: Decimal,
    pub version: i64,
    pub opened_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::users::Entity",
        from = "Column::OwnerId",
        to = "super::users::Column::Id"
    )]
    Users,
    #[sea_orm(
        belongs_to = "super::groups::Entity",
        from = "Column::GroupId",
        to = "super::groups::Column::Id"
    )]
    Groups,
    #[sea_orm(has_many = "super::journal_legs::Entity")]
    JournalLegs,
    #[sea_orm(has_many = "super::accounts_groups::Entity")]
    AccountsGroups,
}

impl Related<super::users::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Users.def()
    }
}

impl Related<super::groups::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Groups.def()
    }
}

impl Related<super::journal_legs::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::JournalLegs.def()
    }
}

impl Related<super::accounts_groups::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AccountsGroups.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
