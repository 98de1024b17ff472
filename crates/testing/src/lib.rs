//! Property-based invariant checks for `simmips-core`, kept as a
//! separate crate so the core library's own `#[cfg(test)]` unit tests
//! stay focused on white-box detail while this crate exercises the
//! public API the way an external caller would.

pub mod property_based;
