use colored::*;
use terminal_size::{terminal_size, Height, Width};

fn terminal_width() -> usize {
    let (width, _) = terminal_size().unwrap_or((Width(80), Height(24)));
    width.0 as usize
}

pub fn print_rule() {
    println!("{}", "─".repeat(terminal_width()).black().bold());
}

pub fn print_header(model: &str, platform: &str, api_mode: &str) {
    print_rule();

    let name = "duet".yellow().bold();
    let version = format!("v{}", env!("CARGO_PKG_VERSION")).black().bold();
    println!("  {} {}", name, version);

    let info = format!("  {}  •  {}  •  {}", model, platform, api_mode).cyan();
    println!("{}", info);

    if let Ok(path) = std::env::current_dir() {
        let path_str = path.to_string_lossy().black().bold();
        println!("  {}", path_str);
    }

    print_rule();
}

pub fn print_step(msg: &str) {
    println!("  {} {}", "•".green(), msg);
}

pub fn print_success(msg: &str) {
    println!("  {} {}", "✓".green().bold(), msg.green());
}

pub fn print_warning(msg: &str) {
    println!("  {} {}", "⚠️ ".yellow().bold(), msg.yellow());
}

pub fn print_error(msg: &str) {
    println!("  {} {}", "❌".red().bold(), msg.red());
}

pub fn print_thinking(msg: &str) {
    println!("  {} {}", "∴".magenta(), msg.dimmed());
}

/// Key/value line used by `duet status`.
pub fn print_field(key: &str, value: &str) {
    println!("  {:<16} {}", key.bold(), value);
}
