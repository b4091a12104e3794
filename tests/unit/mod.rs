//! Unit tests for agentflow modules
//!
//! These tests cover individual components with stub capabilities; nothing
//! touches the network.

mod test_config;
mod test_engine;
mod test_parser;
mod test_session;
mod test_template;
