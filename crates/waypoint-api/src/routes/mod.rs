pub mod dms;
pub mod users;
