use colored::Colorize;

use crate::audit::ApiCallRecord;
use crate::models::{Manifest, MonitoredFailure, RepositoryEntry, TagEntry};
use crate::paginate::PaginationMethod;
use crate::probe::ProbeReport;

/// Print one registry's repository listing
pub fn print_repositories(
    registry: &str,
    entries: &[RepositoryEntry],
    failures: &[MonitoredFailure],
    method: &PaginationMethod,
    has_more: bool,
) {
    println!("\nRepositories: {}", registry.bold());
    println!("{}", "─".repeat(72));

    if entries.is_empty() {
        println!("  {}", "No repositories found.".yellow());
        return;
    }

    for entry in entries {
        let marker = if entry.is_error {
            "!".red().bold().to_string()
        } else if entry.is_monitored {
            "*".yellow().bold().to_string()
        } else {
            " ".to_string()
        };

        println!(
            "  {} {:<40} {:>5}  {}",
            marker,
            entry.name,
            entry.tag_count.to_string(),
            entry.recent_tags_display().dimmed(),
        );
    }

    for failure in failures {
        eprintln!(
            "{} Monitored repo '{}' failed: {}",
            "[WARN]".yellow().bold(),
            failure.name,
            failure.error
        );
    }

    let more = if has_more {
        ", more available".to_string()
    } else {
        String::new()
    };
    println!("{}", "─".repeat(72));
    println!(
        "{} repositories ({}{})",
        entries.len().to_string().bold(),
        method,
        more
    );
}

/// Print one row of the status view
pub fn print_status(name: &str, url: &str, report: &ProbeReport) {
    let badge = match report.status.badge() {
        "OK" => "OK".green().bold().to_string(),
        "PART" => "PART".yellow().bold().to_string(),
        "AUTH" => "AUTH".yellow().bold().to_string(),
        _ => "ERR".red().bold().to_string(),
    };

    println!(
        "  [{:<4}] {:<28} {:<34} {:>6}  {:>7}  {}",
        badge,
        truncate(name, 28),
        truncate(url, 34).dimmed(),
        report
            .repo_count
            .clone()
            .unwrap_or_else(|| "?".to_string()),
        format!("{}ms", report.response_time_ms).dimmed(),
        report.status,
    );
}

pub fn print_status_header() {
    println!("\n{}", "Registry status".bold());
    println!("{}", "─".repeat(100));
    println!(
        "  {:<6} {:<28} {:<34} {:>6}  {:>7}  {}",
        "Status", "Name", "URL", "Repos", "Time", "Detail"
    );
}

/// Print the tags view for one repository
pub fn print_tags(repo: &str, tags: &[TagEntry]) {
    println!("\nTags: {}", repo.bold());
    println!("{}", "─".repeat(60));

    if tags.is_empty() {
        println!("  {}", "No tags found.".yellow());
        return;
    }
    for tag in tags {
        println!("  {:<40} {}", tag.name, tag.uploaded_display().dimmed());
    }
    println!("{}", "─".repeat(60));
    println!("{} tags", tags.len().to_string().bold());
}

/// Print a manifest summary: negotiated media type, digest, layer sizes
pub fn print_manifest(repo: &str, tag: &str, record: &ApiCallRecord, manifest: Option<&Manifest>) {
    println!("\nManifest: {}:{}", repo.bold(), tag.bold());
    println!("{}", "─".repeat(60));

    if record.status_code != 200 {
        let reason = record
            .error
            .clone()
            .unwrap_or_else(|| format!("HTTP {}", record.status_code));
        println!("  {} {}", "Fetch failed:".red().bold(), reason);
        return;
    }

    // Prefer the negotiated content type; fall back to the body's own
    // mediaType field for registries that omit the header
    let media_type = record
        .header("content-type")
        .map(|value| value.to_string())
        .or_else(|| manifest.and_then(|m| m.media_type.clone()));
    if let Some(media_type) = media_type {
        println!("  Media type: {}", media_type);
    }
    if let Some(digest) = record.header("docker-content-digest") {
        println!("  Digest:     {}", truncate(digest, 32).dimmed());
    }

    match manifest {
        Some(manifest) => {
            println!("  Schema:     v{}", manifest.schema_version);
            if let Some(config) = &manifest.config {
                println!("  Config:     {}", truncate(&config.digest, 32).dimmed());
            }
            if !manifest.layers.is_empty() {
                let total: u64 = manifest.layers.iter().filter_map(|l| l.size).sum();
                println!(
                    "  Layers:     {} ({} bytes total)",
                    manifest.layers.len(),
                    total
                );
            }
        }
        None => println!("  {}", "Manifest body could not be parsed.".yellow()),
    }
}

/// Print the recent-call log the way the debug console shows it
pub fn print_calls(records: &[ApiCallRecord]) {
    println!("\n{}", "API calls".bold());
    println!("{}", "═".repeat(100));

    if records.is_empty() {
        println!("  No calls recorded.");
        return;
    }

    for record in records {
        let status = call_status_label(record);
        println!(
            "  {} {:<6} {:<58} {:>6} {:>8}  {}",
            status,
            record.method,
            truncate(&record.url, 58),
            format!("{}ms", record.duration_ms),
            format!("{}B", record.size_bytes),
            record.timestamp.dimmed(),
        );
        if let Some(err) = &record.error {
            println!("        {}", err.red());
        }
    }
    println!("{}", "═".repeat(100));
    println!("{} calls logged", records.len().to_string().bold());
}

/// Full detail for one call, including a replayable cURL line
pub fn print_call_detail(record: &ApiCallRecord) {
    println!("\nMethod:   {}", record.method);
    if record.method == "LOCAL" {
        println!("Command:  {}", record.url);
        println!("Exit:     {}", record.status_code);
    } else {
        println!("URL:      {}", record.url);
        println!("Status:   {}", record.status_code);
        println!("cURL:     curl -X {} -i \"{}\"", record.method, record.url);
    }
    println!("Duration: {}ms", record.duration_ms);
    println!("Size:     {} bytes", record.size_bytes);
    println!("Time:     {}", record.timestamp);
    if !record.headers.is_empty() {
        println!("Headers:");
        for (name, value) in record.headers.iter().take(8) {
            println!("  {}: {}", name, value.dimmed());
        }
        if record.headers.len() > 8 {
            println!("  ... and {} more", record.headers.len() - 8);
        }
    }
    println!("\nPreview:\n{}", record.content_preview);
}

fn call_status_label(record: &ApiCallRecord) -> String {
    let ok = if record.method == "LOCAL" {
        record.status_code == 0
    } else {
        record.status_code == 200
    };
    if ok {
        format!("[{:>3}]", record.status_code).green().to_string()
    } else {
        format!("[{:>3}]", record.status_code).red().bold().to_string()
    }
}

fn truncate(text: &str, max: usize) -> &str {
    if text.len() > max {
        &text[..max]
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_clips_long_strings() {
        assert_eq!(truncate("abcdef", 4), "abcd");
        assert_eq!(truncate("abc", 4), "abc");
    }
}
