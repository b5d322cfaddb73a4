//! taskq config command implementation

use std::path::PathBuf;

use serde::Serialize;

use crate::config::Config;
use crate::error::Result;
use crate::output::{emit_success, HumanOutput, OutputOptions};

/// Options for `taskq config show`
pub struct ShowOptions {
    pub config: Config,
    pub path: Option<PathBuf>,
    pub json: bool,
    pub quiet: bool,
}

#[derive(Serialize)]
struct ConfigShowReport<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<&'a PathBuf>,
    config: &'a Config,
}

pub fn run_show(options: ShowOptions) -> Result<()> {
    let config = &options.config;
    let report = ConfigShowReport {
        path: options.path.as_ref(),
        config,
    };

    let mut human = HumanOutput::new("taskq config");
    if let Some(path) = &options.path {
        human.push_summary("path", path.display().to_string());
    }
    human.push_summary("titles.default", config.titles.default.clone());
    human.push_summary("titles.max_len", config.titles.max_len.to_string());
    human.push_summary("controller.reentry", config.controller.reentry.as_str());
    human.push_summary("remote.latency_ms", config.remote.latency_ms.to_string());

    emit_success(
        OutputOptions {
            json: options.json,
            quiet: options.quiet,
        },
        "config show",
        &report,
        Some(&human),
    )
}
