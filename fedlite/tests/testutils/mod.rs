//! Test utilities for FedLite integration tests
//!
//! - test_fixture: schema, plan builders and a fixture engine
//! - mock_datasource: scripted subgraphs that record every request

#![allow(dead_code)]

pub mod mock_datasource;
pub mod test_fixture;
