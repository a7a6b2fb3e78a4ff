pub mod repository;
pub mod scheduler;
pub mod worker_client;

pub use repository::*;
pub use scheduler::*;
pub use worker_client::*;
