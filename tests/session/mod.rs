//! Session module tests.

mod registry_test;
