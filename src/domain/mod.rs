pub mod history;
pub mod users;
