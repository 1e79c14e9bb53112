use crate::errors::{AppError, AppResult};
use std::path::PathBuf;

pub const DATA_DIR_ENV: &str = "STUDIO_OPS_DATA_DIR";
pub const PIPELINE_ENV: &str = "STUDIO_OPS_PIPELINE";
pub const ASSISTANT_CMD_ENV: &str = "STUDIO_OPS_ASSISTANT_CMD";

const DEFAULT_DATA_DIR: &str = ".studio-ops";

/// Process-level configuration. Runtime settings that users edit live in the
/// database instead (see `Database::get_settings`).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub pipeline_path: PathBuf,
    /// Program plus arguments; `None` leaves the assistant disabled.
    pub assistant_command: Option<Vec<String>>,
}

impl AppConfig {
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
        let data_dir = match non_empty(lookup(DATA_DIR_ENV)) {
            Some(dir) => PathBuf::from(dir),
            None => std::env::current_dir()
                .map_err(|error| AppError::Config(format!("Cannot resolve working directory: {}", error)))?
                .join(DEFAULT_DATA_DIR),
        };
        let pipeline_path = non_empty(lookup(PIPELINE_ENV))
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("pipeline.yaml"));
        let assistant_command = non_empty(lookup(ASSISTANT_CMD_ENV))
            .map(|raw| parse_command_line(&raw))
            .transpose()?;

        Ok(Self {
            data_dir,
            pipeline_path,
            assistant_command,
        })
    }

    pub fn for_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            pipeline_path: data_dir.join("pipeline.yaml"),
            data_dir,
            assistant_command: None,
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("studio.sqlite")
    }

    pub fn drive_dir(&self) -> PathBuf {
        self.data_dir.join("drive")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|raw| raw.trim().to_string()).filter(|raw| !raw.is_empty())
}

/// Whitespace split with double-quote grouping, enough for a command plus flags.
fn parse_command_line(raw: &str) -> AppResult<Vec<String>> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for ch in raw.chars() {
        match ch {
            '"' => quoted = !quoted,
            ch if ch.is_whitespace() && !quoted => {
                if !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                }
            }
            ch => current.push(ch),
        }
    }
    if quoted {
        return Err(AppError::Config(format!("Unterminated quote in {}", ASSISTANT_CMD_ENV)));
    }
    if !current.is_empty() {
        parts.push(current);
    }
    if parts.is_empty() {
        return Err(AppError::Config(format!("{} is empty", ASSISTANT_CMD_ENV)));
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn reads_paths_and_assistant_command() {
        let config = AppConfig::from_lookup(lookup(&[
            (DATA_DIR_ENV, "/tmp/studio"),
            (ASSISTANT_CMD_ENV, r#"gemini --model "flash lite" -q"#),
        ]))
        .expect("config");

        assert_eq!(config.data_dir, PathBuf::from("/tmp/studio"));
        assert_eq!(config.pipeline_path, PathBuf::from("/tmp/studio/pipeline.yaml"));
        assert_eq!(config.database_path(), PathBuf::from("/tmp/studio/studio.sqlite"));
        assert_eq!(
            config.assistant_command,
            Some(vec!["gemini".to_string(), "--model".to_string(), "flash lite".to_string(), "-q".to_string()])
        );
    }

    #[test]
    fn blank_values_fall_back() {
        let config = AppConfig::from_lookup(lookup(&[
            (DATA_DIR_ENV, "/srv/ops"),
            (PIPELINE_ENV, "  "),
            (ASSISTANT_CMD_ENV, ""),
        ]))
        .expect("config");
        assert_eq!(config.pipeline_path, PathBuf::from("/srv/ops/pipeline.yaml"));
        assert!(config.assistant_command.is_none());
    }

    #[test]
    fn unterminated_quote_is_a_config_error() {
        let result = AppConfig::from_lookup(lookup(&[(DATA_DIR_ENV, "/x"), (ASSISTANT_CMD_ENV, "run \"oops")]));
        assert!(matches!(result, Err(AppError::Config(_))));
    }
}
