use std::io::Write;
use std::process::Command;
use std::str;

/// CLI interface tests
#[cfg(test)]
mod cli_tests {
    use super::*;

    fn serbridge() -> Command {
        Command::new(env!("CARGO_BIN_EXE_serbridge"))
    }

    #[test]
    fn test_cli_help() {
        let output = serbridge().arg("--help").output().expect("Failed to execute command");
        let stdout = str::from_utf8(&output.stdout).expect("Invalid UTF-8");

        assert!(output.status.success());
        assert!(stdout.contains("Usage:"));
        for flag in ["--bind", "--dev", "--config", "--port", "--telnet", "--gotty", "--stdin"] {
            assert!(stdout.contains(flag), "help is missing {}", flag);
        }
    }

    #[test]
    fn test_cli_version() {
        let output = serbridge().arg("--version").output().expect("Failed to execute command");
        let stdout = str::from_utf8(&output.stdout).expect("Invalid UTF-8");
        assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_cli_requires_device_or_config() {
        let output = serbridge().arg("--telnet").output().expect("Failed to execute command");
        let stderr = str::from_utf8(&output.stderr).expect("Invalid UTF-8");

        assert!(!output.status.success());
        assert!(stderr.contains("Usage:"));
    }

    #[test]
    fn test_cli_missing_listener_file_exits_with_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let output = serbridge()
            .arg("--config")
            .arg(dir.path().join("missing.conf"))
            .arg("--settings")
            .arg(dir.path().join("settings.toml"))
            .output()
            .expect("Failed to execute command");
        let stderr = str::from_utf8(&output.stderr).expect("Invalid UTF-8");

        assert_eq!(output.status.code(), Some(1));
        assert!(stderr.contains("Error:"));
    }

    #[test]
    fn test_cli_bad_settings_file_exits_with_error() {
        let mut settings = tempfile::NamedTempFile::new().unwrap();
        writeln!(settings, "[global]\nsubscriber_capacity = \"lots\"").unwrap();

        let output = serbridge()
            .args(["--dev", "/dev/null", "--telnet", "--settings"])
            .arg(settings.path())
            .output()
            .expect("Failed to execute command");
        let stderr = str::from_utf8(&output.stderr).expect("Invalid UTF-8");

        assert_eq!(output.status.code(), Some(1));
        assert!(stderr.contains("Error: Configuration error"));
    }
}
