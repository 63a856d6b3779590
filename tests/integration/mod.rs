//! Integration test modules.

mod emitter_test;
mod follower_test;
mod rig;
