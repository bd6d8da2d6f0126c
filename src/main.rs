use clap::Parser;
use drive_hubspot_sync::utils::error::ErrorSeverity;
use drive_hubspot_sync::utils::{logger, validation::Validate};
use drive_hubspot_sync::{app, CliConfig, OutcomeStatus, SyncError};

fn exit_code(error: &SyncError) -> i32 {
    match error.severity() {
        ErrorSeverity::Low => 0,
        ErrorSeverity::Medium => 2, // 可重試
        ErrorSeverity::High => 1,
        ErrorSeverity::Critical => 3,
    }
}

fn fail(error: SyncError) -> ! {
    tracing::error!(
        "❌ Sync failed: {} (Category: {:?}, Severity: {:?})",
        error,
        error.category(),
        error.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", error.recovery_suggestion());

    eprintln!("❌ {}", error.user_friendly_message());
    eprintln!("💡 建議: {}", error.recovery_suggestion());
    std::process::exit(exit_code(&error).max(1));
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 與原本的 .env 用法相容
    dotenv::dotenv().ok();

    let cli = CliConfig::parse();

    if cli.log_json {
        logger::init_json_logger(cli.verbose);
    } else {
        logger::init_cli_logger(cli.verbose);
    }

    tracing::info!("Starting drive-hubspot-sync");

    let config = match cli.resolve() {
        Ok(config) => config,
        Err(e) => fail(e),
    };
    if cli.verbose {
        tracing::debug!(
            "Folder: {}, owner sources: {:?}, match: {:?}, associated: {:?}",
            config.google.folder_id,
            config.sync.owner_sources,
            config.sync.match_objects,
            config.sync.include_associated
        );
    }

    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(1);
    }

    let report = match app::run(config).await {
        Ok(report) => report,
        Err(e) => fail(e),
    };

    println!(
        "✅ Sync finished: {} attached, {} dry-run, {} without owner, {} unmatched, {} unsupported, {} failed",
        report.count(OutcomeStatus::Attached),
        report.count(OutcomeStatus::DryRun),
        report.count(OutcomeStatus::NoOwners),
        report.count(OutcomeStatus::NoMatch),
        report.count(OutcomeStatus::Unsupported),
        report.count(OutcomeStatus::Failed)
    );

    for outcome in report
        .outcomes
        .iter()
        .filter(|o| o.status == OutcomeStatus::Failed)
    {
        eprintln!(
            "  ✗ {}: {}",
            outcome.file_name,
            outcome.message.as_deref().unwrap_or("lookup failed")
        );
    }

    if report.has_failures() {
        std::process::exit(2);
    }

    Ok(())
}
