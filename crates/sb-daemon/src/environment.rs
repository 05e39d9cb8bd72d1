use std::path::PathBuf;

use tracing::{debug, info, warn};

/// Selects `environment/<name>.env` instead of `.env`.
const ENV_SELECTOR: &str = "SWITCHBOARD_ENV";

/// Outcome of loading an env file. Loading happens before logging is
/// installed, so it is reported afterwards with [`EnvFile::report`].
#[derive(Debug)]
pub enum EnvFile {
    Loaded(PathBuf),
    NotFound,
    Failed { file: String, error: String },
}

impl EnvFile {
    pub fn report(&self) {
        match self {
            EnvFile::Loaded(path) => info!(path = %path.display(), "loaded environment file"),
            EnvFile::NotFound => debug!("no .env file found, using process environment"),
            EnvFile::Failed { file, error } => {
                warn!(%file, %error, "failed to load environment file, using process environment")
            }
        }
    }
}

/// Load variables from an env file. Variables already set in the process
/// environment are never overwritten.
pub fn load() -> EnvFile {
    load_from(std::env::var(ENV_SELECTOR).ok().as_deref())
}

fn load_from(selector: Option<&str>) -> EnvFile {
    match selector.map(str::trim).filter(|s| !s.is_empty()) {
        Some(name) => {
            let file = format!("environment/{name}.env");
            match dotenv::from_filename(&file) {
                Ok(path) => EnvFile::Loaded(path),
                Err(e) => EnvFile::Failed {
                    file,
                    error: e.to_string(),
                },
            }
        }
        None => match dotenv::dotenv() {
            Ok(path) => EnvFile::Loaded(path),
            Err(e) if e.not_found() => EnvFile::NotFound,
            Err(e) => EnvFile::Failed {
                file: ".env".into(),
                error: e.to_string(),
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_named_environment_is_reported() {
        match load_from(Some("no-such-environment")) {
            EnvFile::Failed { file, .. } => {
                assert_eq!(file, "environment/no-such-environment.env")
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
