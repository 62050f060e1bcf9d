pub mod config;
pub mod logging;

pub mod catalog;
pub mod conntrack;
pub mod context;
pub mod dispatch;
pub mod dump;
pub mod error;
pub mod protocol;
pub mod requesthandler;
pub mod respool;
pub mod resqueue;
