pub mod health;
pub mod process;
pub mod templates;
pub mod usage;
