//! Property-based tests for the resilient client.
//!
//! Run with: cargo test --test property_tests
//!
//! These tests use proptest to generate random inputs and verify that
//! invariants hold for retry policies and durable registration.
