//! API integration tests, run against the in-memory store

mod api_tests;
