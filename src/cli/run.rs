//! taskq run command implementation
//!
//! Loads a scenario, drives it on a single-threaded runtime and reports the
//! final board.

use std::path::PathBuf;

use serde::Serialize;

use crate::config::{Config, ReentryPolicy};
use crate::error::{Error, Result};
use crate::events::EventDestination;
use crate::mutation::MutationState;
use crate::output::{emit_success, HumanOutput, OutputOptions};
use crate::script::{self, RunReport, Scenario};

/// Options for `taskq run`
pub struct RunOptions {
    pub scenario: PathBuf,
    pub latency_ms: Option<u64>,
    pub reentry: Option<String>,
    pub config: Config,
    pub events: Option<String>,
    pub json: bool,
    pub quiet: bool,
}

#[derive(Serialize)]
struct RunOutput<'a> {
    scenario: &'a PathBuf,
    reentry: &'static str,
    #[serde(flatten)]
    report: &'a RunReport,
}

pub fn run(options: RunOptions) -> Result<()> {
    let mut config = options.config;
    if let Some(reentry) = options.reentry.as_deref() {
        config.controller.reentry = parse_reentry(reentry)?;
    }

    let mut scenario = Scenario::load(&options.scenario)?;
    if let Some(latency_ms) = options.latency_ms {
        scenario.remote.latency_ms = Some(latency_ms);
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let report = runtime.block_on(script::run(scenario, &config))?;

    let events = EventDestination::parse(options.events.as_deref());
    let events_to_stdout = matches!(events, Some(EventDestination::Stdout));
    if let Some(destination) = events {
        destination.open()?.emit_history(&report.history)?;
    }

    let output = RunOutput {
        scenario: &options.scenario,
        reentry: config.controller.reentry.as_str(),
        report: &report,
    };

    let mut human = HumanOutput::new(format!(
        "taskq run: {} actions, {} tasks",
        report.actions.len(),
        report.tasks.len()
    ));
    human.push_summary("remote calls", report.remote_calls.to_string());
    human.push_summary("elapsed", format!("{}ms", report.elapsed_ms));
    human.push_summary("reentry", config.controller.reentry.as_str());
    for action in &report.actions {
        let outcome = match (&action.outcome, &action.error) {
            (Some(outcome), _) => format!("{} -> {}", action.submission, outcome.state()),
            (None, Some(error)) => format!("{} ({error})", action.submission),
            (None, None) => action.submission.clone(),
        };
        human.push_detail(format!("#{} @{}ms {}: {outcome}", action.index, action.at_ms, action.key));
    }
    for task in &report.tasks {
        let mark = if task.is_completed { "x" } else { " " };
        human.push_detail(format!("[{mark}] {} {} ({})", task.id, task.title, task.priority));
    }
    for notice in &report.notices {
        if let Some(message) = notice.message() {
            human.push_warning(message.to_string());
        }
    }

    let rolled_back = report.actions.iter().any(|action| {
        action
            .outcome
            .as_ref()
            .is_some_and(|outcome| outcome.state() == MutationState::RolledBack)
    });
    if rolled_back {
        human.push_next_step(format!(
            "taskq run {} --events - to trace the rolled-back mutations",
            options.scenario.display()
        ));
    }
    if report.actions.iter().any(|action| action.submission == "ignored") {
        human.push_next_step(format!(
            "taskq run {} --reentry queue to send repeated changes in order",
            options.scenario.display()
        ));
    }

    // Events on stdout already carry everything; keep stdout machine-readable.
    if events_to_stdout {
        return Ok(());
    }

    emit_success(
        OutputOptions {
            json: options.json,
            quiet: options.quiet,
        },
        "run",
        &output,
        Some(&human),
    )
}

fn parse_reentry(raw: &str) -> Result<ReentryPolicy> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "queue" => Ok(ReentryPolicy::Queue),
        "ignore" => Ok(ReentryPolicy::Ignore),
        other => Err(Error::InvalidArgument(format!(
            "invalid reentry policy '{other}' (expected queue|ignore)"
        ))),
    }
}
