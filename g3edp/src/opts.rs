/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::path::PathBuf;

use anyhow::anyhow;
use clap::{Arg, ArgAction, ArgMatches, Command, ValueHint, value_parser};

const ARGS_VERSION: &str = "version";
const ARGS_VERBOSE: &str = "verbose";
const ARGS_CONFIG_FILE: &str = "config-file";
const ARGS_TEST_CONFIG: &str = "test-config";
const ARGS_GEN_TRUST_BUNDLE: &str = "gen-trust-bundle";

#[derive(Debug, Default)]
pub struct ProcArgs {
    pub verbose_level: u8,
    pub config_file: Option<PathBuf>,
    pub test_config: bool,
    pub gen_trust_bundle: Option<PathBuf>,
}

fn build_cli_args() -> Command {
    Command::new(crate::build::PKG_NAME)
        .disable_version_flag(true)
        .arg(
            Arg::new(ARGS_VERBOSE)
                .help("Show verbose output")
                .num_args(0)
                .action(ArgAction::Count)
                .short('v')
                .long("verbose"),
        )
        .arg(
            Arg::new(ARGS_VERSION)
                .help("Show version")
                .action(ArgAction::SetTrue)
                .short('V')
                .long("version"),
        )
        .arg(
            Arg::new(ARGS_CONFIG_FILE)
                .help("Config file path")
                .num_args(1)
                .value_name("CONFIG FILE")
                .value_hint(ValueHint::FilePath)
                .value_parser(value_parser!(PathBuf))
                .short('c')
                .long("config-file"),
        )
        .arg(
            Arg::new(ARGS_TEST_CONFIG)
                .help("Test the format of config file and exit")
                .action(ArgAction::SetTrue)
                .short('t')
                .long("test-config"),
        )
        .arg(
            Arg::new(ARGS_GEN_TRUST_BUNDLE)
                .help("Generate a new CA and server certificate into the directory and exit")
                .num_args(1)
                .value_name("OUTPUT DIR")
                .value_hint(ValueHint::DirPath)
                .value_parser(value_parser!(PathBuf))
                .long("gen-trust-bundle"),
        )
}

fn parse_matches(args: &ArgMatches) -> anyhow::Result<Option<ProcArgs>> {
    let mut proc_args = ProcArgs::default();

    if let Some(verbose_level) = args.get_one::<u8>(ARGS_VERBOSE) {
        proc_args.verbose_level = *verbose_level;
    }

    if args.get_flag(ARGS_VERSION) {
        crate::build::print_version(proc_args.verbose_level);
        return Ok(None);
    }

    if let Some(config_file) = args.get_one::<PathBuf>(ARGS_CONFIG_FILE) {
        if !config_file.is_file() {
            return Err(anyhow!(
                "config file {} is not an existed file",
                config_file.display()
            ));
        }
        proc_args.config_file = Some(config_file.to_path_buf());
    }
    if args.get_flag(ARGS_TEST_CONFIG) {
        proc_args.test_config = true;
    }
    if let Some(dir) = args.get_one::<PathBuf>(ARGS_GEN_TRUST_BUNDLE) {
        proc_args.gen_trust_bundle = Some(dir.to_path_buf());
    }

    Ok(Some(proc_args))
}

pub fn parse_clap() -> anyhow::Result<Option<ProcArgs>> {
    let args = build_cli_args().get_matches();
    parse_matches(&args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_default() {
        let args = build_cli_args()
            .try_get_matches_from(["g3edp"])
            .unwrap();
        let proc_args = parse_matches(&args).unwrap().unwrap();
        assert_eq!(proc_args.verbose_level, 0);
        assert!(proc_args.config_file.is_none());
        assert!(!proc_args.test_config);
        assert!(proc_args.gen_trust_bundle.is_none());
    }

    #[test]
    fn parse_verbose_and_gen() {
        let args = build_cli_args()
            .try_get_matches_from(["g3edp", "-vv", "--gen-trust-bundle", "/tmp/certs"])
            .unwrap();
        let proc_args = parse_matches(&args).unwrap().unwrap();
        assert_eq!(proc_args.verbose_level, 2);
        assert_eq!(
            proc_args.gen_trust_bundle.as_deref(),
            Some(std::path::Path::new("/tmp/certs"))
        );
    }

    #[test]
    fn parse_missing_config_file() {
        let args = build_cli_args()
            .try_get_matches_from(["g3edp", "-c", "/nonexistent/g3edp.yaml"])
            .unwrap();
        assert!(parse_matches(&args).is_err());
    }
}
