// tb/src/cli/ui.rs
use std::path::Path;

use colored::Colorize;
use walkdir::WalkDir;

pub fn header(message: &str) {
    println!("{}{}", "==> ".bold().blue(), message.bold());
}

pub fn warning(message: &str) {
    eprintln!("{} {}", "Warning:".yellow(), message);
}

/// File count and apparent size of everything below `path`.
pub fn count_files_and_size(path: &Path) -> (usize, u64) {
    let mut file_count = 0;
    let mut total_size = 0;
    for entry in WalkDir::new(path).into_iter().filter_map(|e| e.ok()) {
        if entry.file_type().is_file() {
            file_count += 1;
            total_size += entry.metadata().map(|m| m.len()).unwrap_or(0);
        }
    }
    (file_count, total_size)
}

pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1}GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1}MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1}KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes}B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_use_binary_units() {
        assert_eq!(format_size(512), "512B");
        assert_eq!(format_size(1536), "1.5KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0MB");
    }
}
