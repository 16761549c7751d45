#![allow(dead_code)]

pub mod builders;
pub mod mock_plugin;

pub use builders::{
    basic_header, bearer_header, canonical_rules, read_json, service, SecurityDocBuilder,
};
pub use mock_plugin::{registry, MockTokenPlugin};
