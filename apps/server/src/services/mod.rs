//! Business services

pub mod counter;

pub use counter::CounterService;
