//! Admin command implementations.

use anyhow::{bail, Context, Result};
use kompass_storage::{
    build_manager, AlertLevel, BackendStats, EvictionReport, MigrationReport, StorageManager,
    UsageReport,
};
use kompass_types::{BackendKind, Category, Scope, Settings};
use tracing::info;

/// Load settings, initialize logging and connect to storage.
pub async fn connect(
    config_path: Option<&str>,
    log_level_override: Option<&str>,
    data_dir_override: Option<&str>,
) -> Result<StorageManager> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;

    if let Some(log_level) = log_level_override {
        settings.log_level = log_level.to_string();
    }
    if let Some(data_dir) = data_dir_override {
        settings.data_directory = data_dir.to_string();
    }

    // Logs go to stderr so command output stays parseable
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log_level)),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    info!(
        data_directory = %settings.expanded_data_directory().display(),
        priority = %settings.storage_backend_priority,
        "Connecting to storage"
    );
    build_manager(&settings)
        .await
        .context("Failed to initialize storage")
}

/// Print which backends are in use.
pub fn show_status(manager: &StorageManager) {
    let info = manager.storage_info();
    println!("Active backend: {}", info.active);
    println!("Available:      {}", join_kinds(&info.available));
    if !info.demoted.is_empty() {
        println!("Demoted:        {}", join_kinds(&info.demoted));
    }
    println!(
        "Limits:         {} per record, {} per user, {} total",
        format_bytes(info.limits.max_file_size_bytes),
        format_bytes(info.limits.max_user_storage_bytes),
        format_bytes(info.limits.max_total_storage_bytes)
    );
    println!(
        "Cleanup:        {} at {:.0}% (keep {} per category)",
        if info.limits.auto_cleanup_enabled { "automatic" } else { "disabled" },
        info.limits.cleanup_threshold_fraction * 100.0,
        info.limits.min_records_to_keep
    );
}

/// Print backend-wide totals and the capacity alert level.
pub async fn show_monitor(manager: &StorageManager, json: bool) -> Result<()> {
    let stats = manager
        .backend_stats()
        .await
        .context("Failed to collect backend statistics")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        print!("{}", format_stats(&stats));
    }
    Ok(())
}

pub async fn show_usage(manager: &StorageManager, scope: &str, json: bool) -> Result<()> {
    let scope = parse_scope(scope)?;
    let report = manager
        .usage_report(&scope)
        .await
        .with_context(|| format!("Failed to compute usage for {scope}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", format_usage(&report));
    }
    Ok(())
}

pub async fn list_records(manager: &StorageManager, scope: &str, category: &str) -> Result<()> {
    let scope = parse_scope(scope)?;
    let category: Category = category.parse()?;
    let records = manager
        .list(&scope, category)
        .await
        .with_context(|| format!("Failed to list {scope}/{category}"))?;

    if records.is_empty() {
        println!("No records in {scope}/{category}");
        return Ok(());
    }
    for record in &records {
        println!(
            "{}  {:>10}  {}",
            record.created_at.format("%Y-%m-%d %H:%M:%S"),
            format_bytes(record.size_bytes),
            record.key
        );
    }
    println!("{} records", records.len());
    Ok(())
}

pub async fn run_cleanup(manager: &StorageManager, scope: &str) -> Result<()> {
    let scope = parse_scope(scope)?;
    let report = manager
        .cleanup(&scope)
        .await
        .with_context(|| format!("Cleanup failed for {scope}"))?;
    print!("{}", format_eviction(&report));
    Ok(())
}

/// Migrate records; exits with an error if any record failed.
pub async fn run_migration(
    manager: &StorageManager,
    scope: Option<&str>,
    from: &str,
    to: Option<&str>,
) -> Result<()> {
    let scope = scope.map(parse_scope).transpose()?;
    let source: BackendKind = from.parse()?;
    let dest: BackendKind = match to {
        Some(to) => to.parse()?,
        None => manager.storage_info().active,
    };

    let report = manager.migrate(source, dest, scope.as_ref()).await;
    print!("{}", format_migration(&report));

    if let Some(reason) = &report.aborted {
        bail!("Migration aborted: {reason}");
    }
    if !report.failures.is_empty() {
        bail!(
            "{} records failed to migrate; re-run to retry",
            report.failures.len()
        );
    }
    Ok(())
}

fn parse_scope(scope: &str) -> Result<Scope> {
    Scope::parse(scope).with_context(|| format!("Invalid scope '{scope}'"))
}

fn join_kinds(kinds: &[BackendKind]) -> String {
    kinds
        .iter()
        .map(BackendKind::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Human-readable size with binary units.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = "B";
    for next in UNITS {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = next;
    }
    format!("{value:.1} {unit}")
}

fn format_usage(report: &UsageReport) -> String {
    let mut out = format!("Usage for {} on {}\n", report.scope, report.backend);
    for (category, usage) in &report.categories {
        out.push_str(&format!(
            "  {:<14} {:>4} records  {:>10}\n",
            category.as_str(),
            usage.count,
            format_bytes(usage.bytes)
        ));
    }
    if !report.scope.is_global() {
        out.push_str(&format!(
            "  user:  {} of {} ({:.1}%)\n",
            format_bytes(report.scope_bytes),
            format_bytes(report.user_limit_bytes),
            report.user_usage_percent
        ));
    }
    out.push_str(&format!(
        "  total: {} of {} ({:.1}%)\n",
        format_bytes(report.total_bytes),
        format_bytes(report.total_limit_bytes),
        report.total_usage_percent
    ));
    if report.over_threshold {
        out.push_str("  over cleanup threshold\n");
    }
    out
}

fn format_stats(stats: &BackendStats) -> String {
    let mut out = format!("Storage on {}\n", stats.backend);
    out.push_str(&format!("  records: {}\n", stats.total_records));
    out.push_str(&format!(
        "  users:   {}{}\n",
        stats.user_count,
        if stats.has_global { " (plus global)" } else { "" }
    ));
    for (category, usage) in &stats.categories {
        out.push_str(&format!(
            "  {:<14} {:>4} records  {:>10}\n",
            category.as_str(),
            usage.count,
            format_bytes(usage.bytes)
        ));
    }
    out.push_str(&format!(
        "  total: {} of {} ({:.1}%)\n",
        format_bytes(stats.total_bytes),
        format_bytes(stats.total_limit_bytes),
        stats.usage_percent
    ));
    if stats.alert != AlertLevel::Normal {
        out.push_str(&format!(
            "  {}: {}\n",
            stats.alert.to_string().to_uppercase(),
            stats.alert.message()
        ));
    }
    out
}

fn format_eviction(report: &EvictionReport) -> String {
    if report.is_empty() {
        let state = if report.below_threshold {
            "below cleanup threshold"
        } else {
            "retention floors reached"
        };
        return format!("Nothing evicted ({state})\n");
    }
    let mut out = String::new();
    for record in &report.evicted {
        out.push_str(&format!(
            "  evicted {}/{} ({})\n",
            record.category,
            record.key,
            format_bytes(record.size_bytes)
        ));
    }
    out.push_str(&format!(
        "Evicted {} records, reclaimed {}\n",
        report.count(),
        format_bytes(report.bytes_reclaimed)
    ));
    if report.floor_reached {
        out.push_str("Still over cleanup threshold: retention floors reached\n");
    }
    out
}

fn format_migration(report: &MigrationReport) -> String {
    let mut out = format!(
        "Scanned {}, migrated {} ({}), skipped {}, failed {}\n",
        report.scanned,
        report.migrated,
        format_bytes(report.bytes_migrated),
        report.skipped,
        report.failures.len()
    );
    for failure in &report.failures {
        let key = failure.key.as_deref().unwrap_or("*");
        out.push_str(&format!(
            "  {}/{}/{}: {}\n",
            failure.scope, failure.category, key, failure.reason
        ));
    }
    out
}
