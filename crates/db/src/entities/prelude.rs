//! Entity re-exports.

pub use super::accounts::Entity as Accounts;
pub use super::accounts_groups::Entity as AccountsGroups;
pub use super::categories::Entity as Categories;
pub use super::goals::Entity as Goals;
pub use super::groups::Entity as Groups;
pub use super::journal_entries::Entity as JournalEntries;
pub use super::journal_legs::Entity as JournalLegs;
pub use super::notifications::Entity as Notifications;
pub use super::user_groups::Entity as UserGroups;
pub use super::users::Entity as Users;
