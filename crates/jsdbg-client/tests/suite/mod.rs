// Consolidated integration test suite, compiled by `tests/tests.rs` into a
// single binary.
mod breakpoint_lifecycle;
mod pause_lifecycle;
mod session_lifecycle;
mod value_cache;
