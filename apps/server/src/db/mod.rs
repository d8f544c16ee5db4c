//! Data layer - in-memory repositories

pub mod counter;

pub use counter::CounterRepo;
