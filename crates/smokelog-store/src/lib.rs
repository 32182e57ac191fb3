pub mod database;
pub mod days;
pub mod entries;
pub mod error;
pub mod row_helpers;
pub mod schema;

pub use database::Database;
pub use days::{DayRepo, DayRow};
pub use entries::{EntryRepo, EntryRow};
pub use error::StoreError;
