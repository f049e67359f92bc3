//! Common utilities and helper functions

pub mod retry;
