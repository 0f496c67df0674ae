//! Small formatting helpers shared across pipelines and the CLI.

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format duration as human-readable string
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}

/// Render a command line for diagnostics with the password argument masked.
///
/// Any argument starting with `--password=` is replaced by `--password=***`
/// so connection secrets never reach logs or error messages.
pub fn mask_command(program: &str, args: &[String]) -> String {
    let mut parts = Vec::with_capacity(args.len() + 1);
    parts.push(program.to_string());
    for arg in args {
        if arg.starts_with("--password=") {
            parts.push("--password=***".to_string());
        } else {
            parts.push(arg.clone());
        }
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(1023), "1023.00 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024), "5.00 GB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(30), "30s");
        assert_eq!(format_duration(90), "1m 30s");
        assert_eq!(format_duration(3665), "1h 1m");
    }

    #[test]
    fn test_mask_command_hides_password() {
        let args = vec![
            "--host=localhost".to_string(),
            "--password=hunter2".to_string(),
            "mydb".to_string(),
        ];
        let rendered = mask_command("mysqldump", &args);
        assert!(rendered.contains("--password=***"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_mask_command_without_password() {
        let args = vec!["--host=localhost".to_string()];
        assert_eq!(mask_command("mysql", &args), "mysql --host=localhost");
    }
}
