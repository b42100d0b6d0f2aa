use owo_colors::OwoColorize;
use serde_json::json;

use wispctl_core::CustomerId;

use crate::cli::{GlobalOpts, MigrateDirection};
use crate::error::CliError;
use crate::services::Services;

pub async fn handle_migrate(
    services: &Services,
    global: &GlobalOpts,
    direction: MigrateDirection,
) -> Result<(), CliError> {
    let outcome = match direction {
        MigrateDirection::ToPrepaid { customer, admin } => {
            services
                .coordinator
                .migrate_to_prepaid(CustomerId(customer), admin)
                .await?
        }
        MigrateDirection::ToPostpaid { customer, admin } => {
            services
                .coordinator
                .migrate_to_postpaid(CustomerId(customer), admin)
                .await?
        }
    };

    if global.json {
        println!(
            "{}",
            json!({
                "success": outcome.success,
                "message": outcome.message,
                "record_id": outcome.record_id.map(|id| id.to_string()),
            })
        );
    } else if outcome.success {
        println!("{} {}", "ok".green().bold(), outcome.message);
    } else {
        println!("{} {}", "failed".red().bold(), outcome.message);
    }

    if outcome.success {
        Ok(())
    } else {
        Err(CliError::Operation {
            message: outcome.message,
        })
    }
}

pub async fn handle_fix(
    services: &Services,
    global: &GlobalOpts,
    customer: u64,
) -> Result<(), CliError> {
    let outcome = services
        .coordinator
        .fix_prepaid_customer(CustomerId(customer))
        .await?;

    if global.json {
        println!(
            "{}",
            json!({ "success": outcome.success, "steps": outcome.messages })
        );
    } else {
        for message in &outcome.messages {
            println!("  {message}");
        }
        if outcome.success {
            println!("{} customer {customer} reconciled", "ok".green().bold());
        } else {
            println!("{} customer {customer} not repaired", "failed".red().bold());
        }
    }

    if outcome.success {
        Ok(())
    } else {
        Err(CliError::Operation {
            message: outcome.messages.join("; "),
        })
    }
}

pub async fn handle_fix_all(services: &Services, global: &GlobalOpts) -> Result<(), CliError> {
    let batch = services.coordinator.fix_all_prepaid_customers().await?;

    if global.json {
        println!(
            "{}",
            json!({
                "fixed": batch.fixed,
                "failed": batch.failed,
                "messages": batch.messages,
            })
        );
    } else {
        for message in &batch.messages {
            println!("  {message}");
        }
        println!("batch repair: {} fixed, {} failed", batch.fixed, batch.failed);
    }
    Ok(())
}

pub async fn handle_debug(
    services: &Services,
    global: &GlobalOpts,
    customer: u64,
) -> Result<(), CliError> {
    let diagnosis = services
        .coordinator
        .debug_customer_migration(CustomerId(customer))
        .await?;

    if global.json {
        println!(
            "{}",
            json!({
                "customer_id": customer,
                "billing_mode": diagnosis.billing_mode.map(|m| m.to_string()),
                "ip_found": diagnosis.ip_found,
                "ip_address": diagnosis.ip_address,
                "observed_lists": diagnosis.observed_lists,
                "desired_list": diagnosis.desired_list,
                "portal_exists": diagnosis.portal_exists,
                "issues": diagnosis.issues,
                "recommendations": diagnosis.recommendations,
                "can_migrate": diagnosis.can_migrate,
            })
        );
        return Ok(());
    }

    println!("customer {customer}");
    println!(
        "  billing mode:  {}",
        diagnosis
            .billing_mode
            .map_or_else(|| "unknown".to_owned(), |m| m.to_string())
    );
    println!(
        "  customer ip:   {}",
        diagnosis.ip_address.as_deref().unwrap_or("-")
    );
    println!(
        "  observed:      {}",
        if diagnosis.observed_lists.is_empty() {
            "no list membership".to_owned()
        } else {
            diagnosis.observed_lists.join(", ")
        }
    );
    println!(
        "  desired:       {}",
        diagnosis.desired_list.as_deref().unwrap_or("-")
    );
    println!("  portal entry:  {}", diagnosis.portal_exists);
    println!("  can migrate:   {}", diagnosis.can_migrate);

    if !diagnosis.issues.is_empty() {
        println!("  issues:");
        for issue in &diagnosis.issues {
            println!("    {} {issue}", "!".yellow().bold());
        }
    }
    if !diagnosis.recommendations.is_empty() {
        println!("  recommendations:");
        for rec in &diagnosis.recommendations {
            println!("    - {rec}");
        }
    }
    Ok(())
}
