//! Tests for serve and the global options.

use super::parse;
use crate::cli::{Cli, CliCommand};
use clap::Parser;
use std::path::PathBuf;

#[test]
fn cli_parse_serve() {
    match parse(&["rmgr", "serve"]) {
        CliCommand::Serve { listen } => assert!(listen.is_none()),
        _ => panic!("expected Serve"),
    }
}

#[test]
fn cli_parse_serve_listen() {
    match parse(&["rmgr", "serve", "--listen", "127.0.0.1:6000"]) {
        CliCommand::Serve { listen } => assert_eq!(listen.as_deref(), Some("127.0.0.1:6000")),
        _ => panic!("expected Serve with --listen"),
    }
}

#[test]
fn cli_global_options_after_subcommand() {
    let cli = Cli::try_parse_from([
        "rmgr",
        "ping",
        "--config",
        "/etc/rmgr.toml",
        "--server",
        "10.0.0.1:5437",
    ])
    .unwrap();
    assert_eq!(cli.config, Some(PathBuf::from("/etc/rmgr.toml")));
    assert_eq!(cli.server.as_deref(), Some("10.0.0.1:5437"));
    assert!(matches!(cli.command, CliCommand::Ping));
}

#[test]
fn cli_requires_a_subcommand() {
    assert!(Cli::try_parse_from(["rmgr"]).is_err());
}
