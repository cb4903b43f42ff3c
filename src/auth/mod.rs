pub mod handlers;
pub mod password;
pub mod reset;
pub mod tokens;
