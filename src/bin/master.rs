// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use rill::cluster::Master;
use rill::config::{apply_settings, load_settings, Policy};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut policy = Policy::from_env().context("reading DTC_* environment")?;
    let settings = load_settings().context("loading settings file")?;
    apply_settings(&mut policy, &settings);

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(settings.log_filter.as_deref().unwrap_or("info")))
        .context("building log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    Master::run(policy).await.context("running master")?;
    Ok(())
}
