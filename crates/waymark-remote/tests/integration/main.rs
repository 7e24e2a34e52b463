//! Integration tests for waymark-remote
//!
//! Uses wiremock to simulate the Waymark API and verifies end-to-end
//! behavior of the change feed, revision-checked pushes, document
//! fetches, and the connectivity probe.

mod common;

mod test_changes;
mod test_fetch;
mod test_push;
