//! Behavioural scenarios for the workspace lifecycle.

mod lifecycle;
