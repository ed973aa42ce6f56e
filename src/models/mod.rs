pub mod enums;
pub mod family;
pub mod medication;
pub mod prescription;
pub mod profile;
pub mod user;

pub use family::*;
pub use medication::*;
pub use prescription::*;
pub use profile::*;
pub use user::*;
