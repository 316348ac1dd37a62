pub mod backup_exchange;
pub mod chamada;
pub mod classes;
pub mod core;
pub mod enrollments;
pub mod lessons;
pub mod reports;
pub mod setup;
