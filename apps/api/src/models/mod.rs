pub mod analysis;
pub mod streaming;
pub mod user;
