/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use anyhow::{Context, anyhow};
use log::{debug, error, info};

use g3edp::config::EdpConfig;
use g3edp::trust::TrustBundle;

fn main() -> anyhow::Result<()> {
    #[cfg(feature = "vendored-openssl")]
    openssl_probe::init_ssl_cert_env_vars();
    openssl::init();

    let Some(proc_args) = g3edp::opts::parse_clap().context("failed to parse command line options")?
    else {
        return Ok(());
    };

    // set up process logger early, only proc args is used inside
    let _log_guard = g3edp::log::setup(proc_args.verbose_level).context("failed to setup logger")?;

    let config =
        g3edp::config::load(proc_args.config_file.as_deref()).context("failed to load config")?;
    match &proc_args.config_file {
        Some(path) => debug!("loaded config from {}", path.display()),
        None => debug!("no config file given, use the default config"),
    }
    if proc_args.test_config {
        info!("the format of the config file is ok");
        return Ok(());
    }

    if let Some(dir) = &proc_args.gen_trust_bundle {
        let trust_config = config.trust.with_bundle_dir(dir);
        let bundle = TrustBundle::generate(&trust_config).context("failed to generate trust bundle")?;
        bundle
            .write_to(&trust_config)
            .context(format!("failed to write trust bundle to {}", dir.display()))?;
        info!("trust bundle written to {}", dir.display());
        return Ok(());
    }

    let ret = tokio_run(config);

    match ret {
        Ok(_) => Ok(()),
        Err(e) => {
            error!("{e:?}");
            Err(e)
        }
    }
}

fn tokio_run(config: EdpConfig) -> anyhow::Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| anyhow!("failed to start runtime: {e}"))?;
    rt.block_on(g3edp::run(config))
}
