//! Savings goals and their journal-derived progress.

pub mod tracker;
pub mod types;


pub use tracker::GoalTracker;
pub use types::{Goal, GoalProgress, GoalUpdate, NewGoal};
