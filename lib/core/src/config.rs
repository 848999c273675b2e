use std::path::PathBuf;

/// Common CLI configuration shared by service binaries.
///
/// A binary parses these from command-line arguments, then passes them to
/// storage layer initialization.
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    /// Directory holding mutable service data.
    pub data_dir: Option<PathBuf>,

    /// Path to the SQLite database file.
    /// Defaults to `{data_dir}/taskflow.sqlite` if not specified.
    pub sqlite_path: Option<PathBuf>,
}

impl ServiceConfig {
    /// Parse configuration from command-line arguments.
    ///
    /// Supported flags:
    /// - `--data-dir=PATH`
    /// - `--sqlite=PATH`
    pub fn from_args(args: &[String]) -> Self {
        let mut config = ServiceConfig::default();

        for arg in args {
            if let Some(val) = arg.strip_prefix("--data-dir=") {
                config.data_dir = Some(PathBuf::from(val));
            } else if let Some(val) = arg.strip_prefix("--sqlite=") {
                config.sqlite_path = Some(PathBuf::from(val));
            }
        }

        config
    }

    /// Resolve the SQLite database path, falling back to
    /// `{data_dir}/taskflow.sqlite`.
    pub fn resolve_sqlite_path(&self) -> PathBuf {
        self.sqlite_path.clone().unwrap_or_else(|| {
            self.data_dir
                .as_ref()
                .map(|d| d.join("taskflow.sqlite"))
                .unwrap_or_else(|| PathBuf::from("taskflow.sqlite"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_args() {
        let args = vec![
            "--data-dir=/tmp/taskflow".to_string(),
            "--sqlite=/tmp/other.sqlite".to_string(),
        ];
        let config = ServiceConfig::from_args(&args);
        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/taskflow")));
        assert_eq!(config.sqlite_path, Some(PathBuf::from("/tmp/other.sqlite")));
    }

    #[test]
    fn test_resolve_defaults() {
        let config = ServiceConfig {
            data_dir: Some(PathBuf::from("/data")),
            ..Default::default()
        };
        assert_eq!(
            config.resolve_sqlite_path(),
            PathBuf::from("/data/taskflow.sqlite")
        );
    }
}
