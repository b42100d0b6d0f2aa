use std::str::FromStr;

use serde_json::json;
use tabled::{Table, Tabled, settings::Style};

use wispctl_core::JobKind;

use crate::cli::{GlobalOpts, JobsAction};
use crate::error::CliError;
use crate::services::Services;

#[derive(Tabled)]
struct JobRow {
    #[tabled(rename = "job")]
    name: String,
    #[tabled(rename = "next run (UTC)")]
    next_run: String,
}

pub async fn handle(
    services: &Services,
    global: &GlobalOpts,
    action: JobsAction,
) -> Result<(), CliError> {
    match action {
        JobsAction::Run { job } => {
            let kind = JobKind::from_str(&job).map_err(|_| {
                let known: Vec<String> = services
                    .monitoring
                    .status()
                    .jobs
                    .iter()
                    .map(|j| j.kind.to_string())
                    .collect();
                CliError::validation(format!(
                    "unknown job '{job}' (known: {})",
                    known.join(", ")
                ))
            })?;

            services.monitoring.run_job(kind).await?;
            if global.json {
                println!("{}", json!({ "job": kind.to_string(), "ok": true }));
            } else {
                println!("{kind}: done");
            }
            Ok(())
        }
        JobsAction::Status => {
            let status = services.monitoring.status();

            if global.json {
                let jobs: Vec<_> = status
                    .jobs
                    .iter()
                    .map(|j| {
                        json!({
                            "job": j.kind.to_string(),
                            "next_run": j.next_run.map(|t| t.to_rfc3339()),
                        })
                    })
                    .collect();
                println!("{}", json!({ "running": status.running, "jobs": jobs }));
                return Ok(());
            }

            println!("running: {}", status.running);
            let rows: Vec<JobRow> = status
                .jobs
                .iter()
                .map(|j| JobRow {
                    name: j.kind.to_string(),
                    next_run: j
                        .next_run
                        .map_or_else(|| "-".into(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string()),
                })
                .collect();
            println!("{}", Table::new(rows).with(Style::rounded()));
            Ok(())
        }
    }
}
