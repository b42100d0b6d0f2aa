use owo_colors::OwoColorize;
use serde_json::json;

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::services::Services;

pub async fn handle(
    services: &Services,
    global: &GlobalOpts,
    force: bool,
) -> Result<(), CliError> {
    let status = if force {
        services.health.force_recheck().await
    } else {
        services.health.check().await
    };

    if global.json {
        println!(
            "{}",
            json!({
                "online": status.online,
                "response_time_ms": status.response_time_ms,
                "checked_at": status.checked_at.to_rfc3339(),
                "error": status.error,
            })
        );
        return Ok(());
    }

    if status.online {
        let rtt = status
            .response_time_ms
            .map_or_else(|| "?".to_owned(), |ms| format!("{ms} ms"));
        println!("{} router reachable ({rtt})", "ok".green().bold());
    } else {
        let reason = status.error.as_deref().unwrap_or("unknown");
        println!("{} router unreachable: {reason}", "down".red().bold());
    }
    Ok(())
}
