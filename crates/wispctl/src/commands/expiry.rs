use serde_json::json;

use crate::cli::{ExpiryAction, GlobalOpts};
use crate::error::CliError;
use crate::services::Services;

pub async fn handle(
    services: &Services,
    global: &GlobalOpts,
    action: ExpiryAction,
) -> Result<(), CliError> {
    match action {
        ExpiryAction::Run => {
            let report = services.expiry.run_manually().await;

            if global.json {
                println!(
                    "{}",
                    json!({
                        "processed": report.processed,
                        "reminded": report.reminded,
                        "success": report.success,
                    })
                );
            } else {
                println!(
                    "expiry pass: {} reverted, {} reminded, success={}",
                    report.processed, report.reminded, report.success
                );
            }

            if report.success {
                Ok(())
            } else {
                Err(CliError::Operation {
                    message: "expiry pass finished with failures (see logs)".into(),
                })
            }
        }
        ExpiryAction::Status => {
            let status = services.expiry.status();

            if global.json {
                println!(
                    "{}",
                    json!({
                        "state": status.state.to_string(),
                        "last_run": status.last_run.map(|r| json!({
                            "processed": r.processed,
                            "reminded": r.reminded,
                            "success": r.success,
                        })),
                    })
                );
            } else {
                println!("state: {}", status.state);
                match status.last_run {
                    Some(r) => println!(
                        "last run: {} reverted, {} reminded, success={}",
                        r.processed, r.reminded, r.success
                    ),
                    None => println!("last run: never"),
                }
            }
            Ok(())
        }
    }
}
