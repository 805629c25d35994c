//! Shared constants for integration tests.
//!
//! Integration tests are compiled as separate crates (one per top-level file in
//! `tests/`). Placing shared constants under `tests/common/` avoids creating an
//! additional integration test binary while still allowing reuse via:
//!
//! ```rust
//! #[path = "common/test_constants.rs"]
//! mod test_constants;
//! ```

/// API token used by tests; never valid against the real platform.
pub const TEST_API_TOKEN: &str = "fly-test-token";

/// Organisation slug used by tests.
pub const TEST_ORGANIZATION: &str = "personal";

/// Jupyter image reference used by tests.
pub const TEST_IMAGE: &str = "registry.fly.io/jupyter-lab:latest";
