pub mod bridge;
pub mod buffer;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod grammar;
pub mod key;
pub mod ledger;
pub mod resolver;
pub mod scanner;
pub mod session;
pub mod store;
pub mod test_helpers;
