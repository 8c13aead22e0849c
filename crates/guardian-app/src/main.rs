//! Guardian binary - composition root.
//!
//! 1. Parse arguments and load configuration from TOML
//! 2. Initialize tracing
//! 3. Open the audit database and pick the system backend
//! 4. Run one subcommand through the executor

mod cli;

use std::error::Error;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use guardian_action::params::parse_assignments;
use guardian_action::platform::SystemControl;
use guardian_action::{
    apply_profile, ActionKind, ActionLogRecord, ActionResult, ActionStatus, Executor,
    NativeSystem, ProfileManager, ScriptedSystem,
};
use guardian_core::config::GuardianConfig;
use guardian_storage::Database;

use cli::{CliArgs, Command, ProfileCommand};

type CliResult<T> = Result<T, Box<dyn Error>>;

/// Load the config file, returning the load error separately so it can be
/// logged once tracing is up.
fn load_config(path: &Path) -> (GuardianConfig, Option<String>) {
    if !path.exists() {
        return (GuardianConfig::default(), None);
    }
    match GuardianConfig::load(path) {
        Ok(config) => (config, None),
        Err(e) => (GuardianConfig::default(), Some(e.to_string())),
    }
}

fn init_tracing(level: &str) {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();
}

async fn build_executor(config: &GuardianConfig, dry_run: bool) -> CliResult<Executor> {
    let native = Arc::new(NativeSystem::new());
    if dry_run {
        // Simulate against the real process table without touching it.
        let processes = native.list_processes().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Could not list processes for dry run");
            Vec::new()
        });
        let system = Arc::new(
            ScriptedSystem::new()
                .with_processes(processes)
                .with_cpu_count(native.cpu_count()),
        );
        tracing::info!("Dry run: using simulated system and in-memory audit log");
        return Ok(Executor::from_config(
            config,
            system,
            Arc::new(Database::in_memory()?),
        )?);
    }

    let db_path = config.action_log_path();
    if let Some(parent) = db_path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            tracing::error!(path = %parent.display(), error = %e, "Failed to create data directory");
            return Err(e.into());
        }
    }
    let db = Database::new(&db_path)?;
    tracing::info!(path = %db_path.display(), "Audit database opened");
    Ok(Executor::from_config(config, native, Arc::new(db))?)
}

fn print_result(result: &ActionResult) {
    let status = if result.success { "OK" } else { "FAILED" };
    println!("[{}] {}", status, result.message);
    if let Some(error) = &result.error {
        println!("  error: {}", error);
    }
    if let Some(data) = &result.data {
        match serde_json::to_string_pretty(data) {
            Ok(text) => println!("  data: {}", text.replace('\n', "\n  ")),
            Err(e) => tracing::warn!(error = %e, "Failed to render result data"),
        }
    }
    println!("  took {:.1} ms", result.execution_time_ms);
}

fn print_record(record: &ActionLogRecord) {
    let message = record
        .result
        .as_ref()
        .map(|r| r.message.as_str())
        .unwrap_or("-");
    println!(
        "{}  {:<11}  {:<18}  {:<24}  {}{}",
        record.started_at.format("%Y-%m-%d %H:%M:%S"),
        record.status.to_string(),
        record.kind.to_string(),
        record.target,
        message,
        if record.rolled_back { "  (rolled back)" } else { "" }
    );
}

fn exit_for(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn run(args: CliArgs, config: GuardianConfig) -> CliResult<ExitCode> {
    match args.command {
        Command::Kinds => {
            for kind in ActionKind::ALL {
                println!("{}", kind);
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Execute {
            kind,
            target,
            params,
            approve,
        } => {
            let executor = build_executor(&config, args.dry_run).await?;
            let parameters = parse_assignments(&params)?;
            let action = match executor.registry().create_by_name(&kind, target, parameters) {
                Ok(action) => action,
                Err(e) => {
                    eprintln!("{}", e);
                    return Ok(ExitCode::FAILURE);
                }
            };
            let meta = executor.metadata(action.as_ref());
            println!(
                "{} {} (risk: {}{})",
                meta.kind,
                meta.target,
                meta.risk_level,
                if meta.requires_approval {
                    ", approval required"
                } else {
                    ""
                }
            );
            let result = executor.dispatch(action, approve).await;
            print_result(&result);
            Ok(exit_for(result.success))
        }

        Command::History { limit, status } => {
            let executor = build_executor(&config, args.dry_run).await?;
            let records = match status {
                Some(status) => {
                    let status: ActionStatus = status.parse()?;
                    executor.recent_by_status(status, limit)?
                }
                None => executor.recent_history(limit)?,
            };
            if records.is_empty() {
                println!("No actions recorded");
            }
            for record in &records {
                print_record(record);
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::RollbackLast => {
            let executor = build_executor(&config, args.dry_run).await?;
            let result = executor.rollback_last().await;
            print_result(&result);
            Ok(exit_for(result.success))
        }

        Command::Stats => {
            let executor = build_executor(&config, args.dry_run).await?;
            let stats = executor.stats()?;
            println!("Total actions:  {}", stats.total);
            println!("Successful:     {}", stats.successful);
            println!("Failed:         {}", stats.failed);
            println!("Rolled back:    {}", stats.rolled_back);
            println!("Pending:        {}", stats.pending);
            println!("Success rate:   {:.1}%", stats.success_rate());
            Ok(ExitCode::SUCCESS)
        }

        Command::Status => {
            let executor = build_executor(&config, args.dry_run).await?;
            let policy = executor.policy();
            let settings = executor.settings();
            println!("Automation level:   {}", policy.automation_level());
            println!("Approval threshold: {}", policy.approval_threshold());
            println!("Protected targets:  {}", policy.protected_targets().join(", "));
            println!(
                "Rollback:           {} (snapshots {})",
                if settings.enable_rollback { "enabled" } else { "disabled" },
                if settings.snapshot_before_action { "on" } else { "off" }
            );
            println!("Max concurrent:     {}", settings.max_concurrent_actions);
            println!("Action timeout:     {}s", settings.action_timeout.as_secs());
            println!("Audit database:     {}", config.action_log_path().display());

            let system = executor.registry().system();
            match system.metrics().await {
                Ok(m) => {
                    println!(
                        "CPU:                {:.1}% of {} cores",
                        m.cpu_percent, m.cpu_count
                    );
                    println!(
                        "Memory:             {:.1}% ({:.1} / {:.1} GB)",
                        m.memory_percent,
                        m.memory_used_bytes as f64 / (1u64 << 30) as f64,
                        m.memory_total_bytes as f64 / (1u64 << 30) as f64
                    );
                    println!("Disk:               {:.1}%", m.disk_percent);
                }
                Err(e) => println!("Metrics unavailable: {}", e),
            }
            if system.supports_power_plans() {
                match system.power_plan().await {
                    Ok(Some(plan)) => println!("Power plan:         {}", plan),
                    Ok(None) => println!("Power plan:         unknown"),
                    Err(e) => println!("Power plan unavailable: {}", e),
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Profile { command } => {
            let mut manager = ProfileManager::new(config.profiles_dir());
            match command {
                ProfileCommand::List => {
                    let names = manager.list()?;
                    if names.is_empty() {
                        println!(
                            "No profiles in {} (try `guardian profile create-defaults`)",
                            manager.dir().display()
                        );
                    }
                    for name in names {
                        let marker = if name == config.profiles.default_profile {
                            " (default)"
                        } else {
                            ""
                        };
                        println!("{}{}", name, marker);
                    }
                    Ok(ExitCode::SUCCESS)
                }
                ProfileCommand::Show { name } => {
                    let profile = manager.get(&name)?;
                    println!("{}: {}", profile.name, profile.description);
                    if let Some(trigger) = &profile.trigger {
                        println!("  trigger:  {}", trigger);
                    }
                    if let Some(schedule) = &profile.schedule {
                        println!("  schedule: {}", schedule);
                    }
                    println!("  enabled:  {}", profile.enabled);
                    for (i, step) in profile.actions.iter().enumerate() {
                        println!(
                            "  {}. {} {} {}",
                            i + 1,
                            step.kind,
                            step.effective_target(),
                            step.description.as_deref().unwrap_or("")
                        );
                    }
                    Ok(ExitCode::SUCCESS)
                }
                ProfileCommand::Apply { name, approve } => {
                    let profile = manager.activate(&name)?;
                    let executor = build_executor(&config, args.dry_run).await?;
                    let report = apply_profile(&executor, &profile, approve).await?;
                    for step in &report.steps {
                        println!("{} {}:", step.kind, step.target);
                        print_result(&step.result);
                    }
                    println!(
                        "Profile {}: {} succeeded, {} failed",
                        report.profile,
                        report.succeeded(),
                        report.failed()
                    );
                    Ok(exit_for(report.all_succeeded()))
                }
                ProfileCommand::CreateDefaults => {
                    let created = manager.create_defaults()?;
                    if created.is_empty() {
                        println!("Default profiles already exist");
                    } else {
                        println!("Created: {}", created.join(", "));
                    }
                    Ok(ExitCode::SUCCESS)
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let (mut config, load_error) = load_config(&config_file);
    config.apply_env_overrides();
    if let Some(dir) = args.resolve_data_dir() {
        config.general.data_dir = dir;
    }

    // Tracing.
    init_tracing(&args.resolve_log_level(&config.general.log_level));
    match load_error {
        Some(e) => tracing::warn!(
            path = %config_file.display(),
            error = %e,
            "Failed to load config, using defaults"
        ),
        None => tracing::debug!(path = %config_file.display(), "Configuration resolved"),
    }
    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "Invalid configuration");
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    match run(args, config).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
