pub mod availability;
pub mod directory;
pub mod lifecycle;
pub mod policy;
pub mod scheduler;
pub mod store;
