/*!
 * reclone CLI Style System
 *
 * Styling helpers for terminal output: themed text, icons, tables and the
 * end-of-run summary.
 */

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use console::{style, StyledObject};

use crate::clone::{ActiveSession, CloneReport, CloneState};

// ============================================================================
// THEME COLORS
// ============================================================================

/// Brand colors for consistent styling
pub struct Theme;

impl Theme {
    /// Primary accent color (cyan)
    pub fn primary<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).cyan()
    }

    pub fn success<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).green()
    }

    pub fn warning<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).yellow()
    }

    pub fn error<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).red()
    }

    /// Muted/secondary text (dim)
    pub fn muted<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).dim()
    }

    /// Header style (bold cyan)
    pub fn header<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).cyan().bold()
    }

    /// Value/number highlight (bold white)
    pub fn value<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).white().bold()
    }
}

// ============================================================================
// ICONS
// ============================================================================

/// Unicode icons for visual feedback
pub struct Icons;

impl Icons {
    pub const SUCCESS: &'static str = "✓";
    pub const ERROR: &'static str = "✗";
    pub const WARNING: &'static str = "⚠";
    pub const INFO: &'static str = "ℹ";
    pub const RUNNING: &'static str = "◐";

    pub const DATABASE: &'static str = "🛢";
    pub const SATELLITE: &'static str = "🛰";
    pub const CLOCK: &'static str = "⏱";
    pub const SHIELD: &'static str = "🛡";

    pub const ARROW_RIGHT: &'static str = "→";
    pub const BULLET: &'static str = "•";
}

// ============================================================================
// BOX DRAWING
// ============================================================================

/// Draw a section header with a line
pub fn section_header(title: &str) {
    let line_len = 50 - title.len().min(40);
    println!(
        "\n{} {}",
        Theme::header(title),
        Theme::muted("─".repeat(line_len))
    );
}

/// Draw an info box with content
pub fn info_box(title: &str, lines: &[&str]) {
    let max_len = lines
        .iter()
        .map(|l| console::measure_text_width(l))
        .max()
        .unwrap_or(40)
        .max(title.len() + 4);
    let width = max_len + 4;

    println!(
        "┌── {} {}┐",
        Theme::header(title),
        "─".repeat(width.saturating_sub(title.len() + 6))
    );

    for line in lines {
        let pad = (width - 2).saturating_sub(console::measure_text_width(line));
        println!("│ {}{} │", line, " ".repeat(pad));
    }

    println!("└{}┘", "─".repeat(width));
}

// ============================================================================
// TABLES
// ============================================================================

/// Create a styled data table
pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn header_cell(text: &str) -> Cell {
    Cell::new(text).fg(Color::Cyan).add_attribute(Attribute::Bold)
}

/// Sessions that block the clone
pub fn sessions_table(sessions: &[ActiveSession]) -> Table {
    let mut table = create_table();
    table.set_header(vec![
        header_cell("Id"),
        header_cell("User@Host"),
        header_cell("Db"),
        header_cell("Command"),
        header_cell("Time"),
        header_cell("State"),
        header_cell("Info"),
    ]);

    for s in sessions {
        table.add_row(vec![
            Cell::new(s.id),
            Cell::new(format!("{}@{}", s.user, s.host)),
            Cell::new(s.db.as_deref().unwrap_or("-")),
            Cell::new(&s.command),
            Cell::new(format!("{}s", s.time)),
            Cell::new(s.state.as_deref().unwrap_or("-")).fg(Color::DarkGrey),
            Cell::new(truncate(s.info.as_deref().unwrap_or("-"), 60)).fg(Color::DarkGrey),
        ]);
    }

    table
}

/// End-of-run summary
pub fn summary_table(report: &CloneReport) -> Table {
    let mut table = create_table();
    table.set_header(vec![header_cell("Clone Summary"), Cell::new("")]);

    table.add_row(vec![Cell::new("Source"), Cell::new(&report.source)]);
    table.add_row(vec![Cell::new("Target"), Cell::new(&report.target)]);
    table.add_row(vec![
        Cell::new("Final State"),
        state_cell(report.final_state),
    ]);
    table.add_row(vec![
        Cell::new("Progress"),
        Cell::new(format!("{}%", report.percent))
            .fg(Color::White)
            .add_attribute(Attribute::Bold),
    ]);

    if report.retry_count > 0 {
        table.add_row(vec![
            Cell::new("Reconnect Attempts"),
            Cell::new(report.retry_count),
        ]);
    }

    if let Some(ref datadir) = report.datadir {
        table.add_row(vec![
            Cell::new("Data Directory"),
            Cell::new(datadir).fg(Color::DarkGrey),
        ]);
    }

    if let Some(ref watcher) = report.watcher {
        table.add_row(vec![
            Cell::new("Watcher Log"),
            Cell::new(format!("{}:{}", watcher.host, watcher.log_path)).fg(Color::DarkGrey),
        ]);
    }

    if let Some(ref validation) = report.validation {
        let cell = if validation.ok {
            Cell::new(format!("{} {}", Icons::SUCCESS, validation.message)).fg(Color::Green)
        } else {
            Cell::new(format!("{} {}", Icons::ERROR, validation.message)).fg(Color::Red)
        };
        table.add_row(vec![Cell::new("Validation"), cell]);

        if let Some(identity) = &validation.identity {
            table.add_row(vec![
                Cell::new("Server UUID"),
                Cell::new(&identity.server_uuid).fg(Color::DarkGrey),
            ]);
        }
        if let Some(status) = &validation.status {
            if let (Some(begin), Some(end)) = (&status.begin_time, &status.end_time) {
                table.add_row(vec![
                    Cell::new("Clone Window"),
                    Cell::new(format!("{} {} {}", begin, Icons::ARROW_RIGHT, end))
                        .fg(Color::DarkGrey),
                ]);
            }
        }
    }

    if let Some(ref error) = report.error {
        table.add_row(vec![
            Cell::new("Error"),
            Cell::new(error).fg(Color::Red).add_attribute(Attribute::Bold),
        ]);
    }

    table.add_row(vec![
        Cell::new("Duration"),
        Cell::new(format_duration(report.elapsed_ms as f64 / 1000.0)),
    ]);
    table.add_row(vec![Cell::new("Exit Code"), Cell::new(report.exit_code)]);

    table
}

fn state_cell(state: CloneState) -> Cell {
    let color = match state {
        CloneState::Completed | CloneState::PreflightPassed => Color::Green,
        CloneState::Aborted | CloneState::Cancelled | CloneState::TimedOut => Color::Yellow,
        CloneState::Failed => Color::Red,
        _ => Color::White,
    };
    Cell::new(state.as_str())
        .fg(color)
        .add_attribute(Attribute::Bold)
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}

/// Format duration into human-readable string
pub fn format_duration(secs: f64) -> String {
    if secs < 1.0 {
        format!("{:.0}ms", secs * 1000.0)
    } else if secs < 60.0 {
        format!("{:.1}s", secs)
    } else if secs < 3600.0 {
        let mins = (secs / 60.0).floor();
        let remaining = secs % 60.0;
        format!("{}m {:.0}s", mins, remaining)
    } else {
        let hours = (secs / 3600.0).floor();
        let mins = ((secs % 3600.0) / 60.0).floor();
        format!("{}h {}m", hours, mins)
    }
}

/// Print a styled error message with optional suggestion
pub fn print_error(message: &str, suggestion: Option<&str>) {
    eprintln!(
        "\n{} {}",
        Theme::error(format!("{} Error:", Icons::ERROR)),
        message
    );

    if let Some(hint) = suggestion {
        eprintln!(
            "  {} {}",
            Theme::muted(Icons::ARROW_RIGHT),
            Theme::muted(hint)
        );
    }
    eprintln!();
}

pub fn print_warning(message: &str) {
    eprintln!(
        "{} {}",
        Theme::warning(Icons::WARNING.to_string()),
        Theme::warning(message)
    );
}

pub fn print_success(message: &str) {
    println!(
        "{} {}",
        Theme::success(Icons::SUCCESS.to_string()),
        Theme::success(message)
    );
}

pub fn print_info(message: &str) {
    println!("{} {}", Theme::primary(Icons::INFO.to_string()), message);
}

// ============================================================================
// BANNER
// ============================================================================

pub fn print_banner() {
    let version = env!("CARGO_PKG_VERSION");

    println!();
    println!(
        "{}",
        Theme::primary("  ╭─────────────────────────────────────────────────╮")
    );
    println!(
        "{}      {}      {}",
        Theme::primary("  │"),
        Theme::header("🛢  R E C L O N E"),
        Theme::primary("│")
    );
    println!(
        "{}   {}   {}",
        Theme::primary("  │"),
        Theme::muted("MySQL clone-plugin recovery orchestrator"),
        Theme::primary("│")
    );
    println!(
        "{}                  {}                   {}",
        Theme::primary("  │"),
        Theme::muted(format!("v{}", version)),
        Theme::primary("│")
    );
    println!(
        "{}",
        Theme::primary("  ╰─────────────────────────────────────────────────╯")
    );
    println!();
}

// ============================================================================
// TESTS
// ============================================================================
