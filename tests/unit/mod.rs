//! Unit test modules.

mod config_test;
mod near_end_test;
