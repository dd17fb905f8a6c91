//! Tests for probe, portal-api, config, completions, man.

use super::parse;
use crate::cli::{Cli, CliCommand};
use clap::{CommandFactory, Parser};
use clap_complete::Shell;

#[test]
fn cli_parse_probe() {
    match parse(&["netmon", "probe", "http://connectivitycheck.gstatic.com/generate_204"]) {
        CliCommand::Probe { url, https } => {
            assert_eq!(url, "http://connectivitycheck.gstatic.com/generate_204");
            assert!(!https);
        }
        _ => panic!("expected Probe"),
    }
}

#[test]
fn cli_parse_probe_https() {
    match parse(&["netmon", "probe", "https://www.google.com/generate_204", "--https"]) {
        CliCommand::Probe { https, .. } => assert!(https),
        _ => panic!("expected Probe"),
    }
}

#[test]
fn cli_probe_requires_url() {
    assert!(Cli::try_parse_from(["netmon", "probe"]).is_err());
}

#[test]
fn cli_parse_portal_api() {
    match parse(&["netmon", "portal-api", "https://capport.example/api"]) {
        CliCommand::PortalApi { url } => assert_eq!(url, "https://capport.example/api"),
        _ => panic!("expected PortalApi"),
    }
}

#[test]
fn cli_parse_config() {
    assert!(matches!(parse(&["netmon", "config"]), CliCommand::Config));
}

#[test]
fn cli_parse_completions() {
    match parse(&["netmon", "completions", "bash"]) {
        CliCommand::Completions { shell } => assert_eq!(shell, Shell::Bash),
        _ => panic!("expected Completions"),
    }
    assert!(Cli::try_parse_from(["netmon", "completions", "tcsh"]).is_err());
}

#[test]
fn cli_parse_man() {
    assert!(matches!(parse(&["netmon", "man"]), CliCommand::Man));
}

#[test]
fn cli_definition_is_consistent() {
    Cli::command().debug_assert();
}
