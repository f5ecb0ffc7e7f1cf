pub mod controller;
pub mod repository;
pub mod watchdog;

pub use controller::JobController;
pub use repository::JobRepository;
pub use watchdog::JobWatchdog;
