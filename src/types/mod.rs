mod auth;
mod models;
mod permission;

pub use auth::*;
pub use models::*;
pub use permission::*;
