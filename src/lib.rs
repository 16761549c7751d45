//! Warden - rule-based access control with a live security configuration
//!
//! Decides per request whether to allow it, forbid it or demand credentials, and
//! lets operators change permissions and credentials at runtime through small edit
//! commands. Several authentication schemes, each with its own rules, can be active
//! at once.

pub mod authn;
pub mod authz;
pub mod command;
pub mod errors;
pub mod multi;
pub mod security;
pub mod settings;
pub mod store;
pub mod web;
