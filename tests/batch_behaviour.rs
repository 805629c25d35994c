//! Behavioural scenarios for batch provisioning.

mod batch;
