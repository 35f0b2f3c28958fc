mod backup;
mod entitlement;
mod registration;
mod user;

pub use backup::*;
pub use entitlement::*;
pub use registration::*;
pub use user::*;
