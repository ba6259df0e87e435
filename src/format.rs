use colored::Colorize;
use std::time::SystemTime;

use codewake::{Hit, IndexStatus};

/// Format a timestamp as a human-readable relative time string.
///
/// Uses `SystemTime` directly to avoid a `chrono` dependency.
pub fn format_timestamp(time: SystemTime) -> String {
    let elapsed = match SystemTime::now().duration_since(time) {
        Ok(d) => d,
        Err(_) => return "in the future".to_string(),
    };

    let secs = elapsed.as_secs();
    if secs < 60 {
        return "just now".to_string();
    }

    let mins = secs / 60;
    if mins < 60 {
        return if mins == 1 {
            "1 minute ago".to_string()
        } else {
            format!("{mins} minutes ago")
        };
    }

    let hours = mins / 60;
    if hours < 24 {
        return if hours == 1 {
            "1 hour ago".to_string()
        } else {
            format!("{hours} hours ago")
        };
    }

    let days = hours / 24;
    if days == 1 {
        "1 day ago".to_string()
    } else {
        format!("{days} days ago")
    }
}

/// Format a byte count as a human-readable file size (1024-based).
pub fn format_file_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// ASCII art logo for the codewake CLI.
const LOGO: &str = r#"
                _                       _
  ___ ___   __| | _____      ____ _| | _____
 / __/ _ \ / _` |/ _ \ \ /\ / / _` | |/ / _ \
| (_| (_) | (_| |  __/\ V  V / (_| |   <  __/
 \___\___/ \__,_|\___| \_/\_/ \__,_|_|\_\___|
"#;

/// Print the ASCII logo in bold cyan to stdout.
pub fn print_logo() {
    for line in LOGO.trim_start_matches('\n').lines() {
        println!("{}", line.bold().cyan());
    }
}

/// Print the logo followed by version and tagline.
pub fn print_version() {
    print_logo();
    println!("  {} {}", "v".dimmed(), env!("CARGO_PKG_VERSION").bold());
    println!("  {}", "Multi-workspace semantic code index".dimmed());
}

/// Render an ASCII progress/percentage bar.
///
/// `filled` is the number of filled segments, `total` is the bar width.
/// Uses `█` for filled and `░` for unfilled segments.
pub fn render_bar(filled: usize, total: usize) -> String {
    let filled = filled.min(total);
    let unfilled = total - filled;
    format!("{}{}", "█".repeat(filled), "░".repeat(unfilled))
}

/// Print retrieval hits with colored formatting to stdout.
pub fn print_hits(hits: &[Hit], query: &str) {
    if hits.is_empty() {
        println!("  {} No results found for {}", "✗".red().bold(), format!("\"{}\"", query).yellow());
        return;
    }

    println!(
        "{} {} result{} for {}\n",
        "Search:".bold(),
        hits.len().to_string().bold(),
        if hits.len() == 1 { "" } else { "s" },
        format!("\"{}\"", query).yellow()
    );

    for (i, hit) in hits.iter().enumerate() {
        let filled = (hit.score.clamp(0.0, 1.0) * 10.0).round() as usize;
        let bar = render_bar(filled, 10);

        println!(
            "  {} {} {} {}",
            format!("{}.", i + 1).bold(),
            bar,
            format!("{:.4}", hit.score).yellow(),
            hit.path.bold()
        );

        let line_range = format!("{}-{}", hit.start_line, hit.end_line);
        println!("     {} {}", "Lines:".dimmed(), line_range);

        if let Some(ref lang) = hit.language_tag {
            println!("     {} {}", "Language:".dimmed(), lang.cyan());
        }

        let preview: String = hit.content.chars().take(200).collect();
        let preview = preview.replace('\n', " ");
        if !preview.is_empty() {
            println!("     {}", preview.dimmed());
        }

        println!();
    }
}

/// Print a workspace's index status with colored formatting to stdout.
pub fn print_status(status: &IndexStatus) {
    println!("\n  {} {}\n", "●".cyan().bold(), "Index Status".bold());
    println!("  {}  {}", "Workspace:".cyan(), status.workspace.display());
    println!("  {}      {}", "Files:".cyan(), status.file_count.to_string().yellow());
    println!(
        "  {}       {}",
        "Rows:".cyan(),
        status
            .row_count
            .map(|n| n.to_string())
            .unwrap_or_else(|| "none".to_string())
            .yellow()
    );
    println!("  {} {}", "Embedding:".cyan(), status.embedding_id.bold());
    println!("  {}  {}", "Root hash:".cyan(), status.root_hash.dimmed());
    println!();
}
