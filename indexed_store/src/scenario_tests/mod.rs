//! Scenario tests at the public API level.
//!
//! Each test file covers one scenario end to end, using deterministic inputs.

#![cfg(test)]


mod test_custom_map;
mod test_removal_completeness;
