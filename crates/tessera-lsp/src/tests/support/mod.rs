//! Shared fixtures and helpers for session manager tests.

mod scripted_server;
mod world;

use rstest::fixture;

pub use scripted_server::{InitializeReply, ServerScript, full_capabilities};
pub use world::{
    MAIN_RS, RUST_CONFIG, TestWorld, WAIT, is_fatal, is_ready, is_stopped, line_range,
};

/// World serving Rust with a full-featured scripted server.
#[fixture]
pub fn rust_world() -> TestWorld {
    TestWorld::new(RUST_CONFIG, ServerScript::with_capabilities(full_capabilities()))
}
