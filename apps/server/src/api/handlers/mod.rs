//! HTTP request handlers

pub mod visits;

pub use visits::{
    manual_register_visit, register_visit, register_visit_located, visitor_message,
};
