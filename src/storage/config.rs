use std::path::Path;

use medialoader_core::fs_paths::AppPaths;
use medialoader_core::models::settings::AppSettings;

pub const CLIENT_ID_ENV: &str = "MEDIALOADER_CLIENT_ID";
pub const CLIENT_SECRET_ENV: &str = "MEDIALOADER_CLIENT_SECRET";

/// Loads settings, falling back to defaults when the file is missing or
/// unreadable, then applies environment overrides.
pub fn load_settings(paths: &impl AppPaths) -> AppSettings {
    let settings = read_settings(&paths.settings_file());
    apply_env_overrides(settings, |key| std::env::var(key).ok())
}

fn read_settings(file: &Path) -> AppSettings {
    let text = match std::fs::read_to_string(file) {
        Ok(text) => text,
        Err(_) => return AppSettings::default(),
    };
    match serde_json::from_str::<AppSettings>(&text) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!("Ignoring invalid settings file {:?}: {}", file, e);
            AppSettings::default()
        }
    }
}

pub fn apply_env_overrides(mut settings: AppSettings, env: impl Fn(&str) -> Option<String>) -> AppSettings {
    if let Some(id) = env(CLIENT_ID_ENV).filter(|v| !v.trim().is_empty()) {
        settings.catalog.client_id = id;
    }
    if let Some(secret) = env(CLIENT_SECRET_ENV).filter(|v| !v.trim().is_empty()) {
        settings.catalog.client_secret = secret;
    }
    settings
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    struct TempPaths(PathBuf);

    impl AppPaths for TempPaths {
        fn downloads_dir(&self) -> PathBuf {
            self.0.join("downloads")
        }

        fn data_dir(&self) -> PathBuf {
            self.0.clone()
        }

        fn bin_dir(&self) -> Option<PathBuf> {
            Some(self.0.join("bin"))
        }
    }

    #[test]
    fn load_reads_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let paths = TempPaths(dir.path().to_path_buf());
        std::fs::write(
            paths.settings_file(),
            r#"{"schema_version": 1, "download": {"audio_format": "opus"}, "advanced": {"page_size": 20}}"#,
        )
        .unwrap();

        let loaded = load_settings(&paths);
        assert_eq!(loaded.download.audio_format, "opus");
        assert_eq!(loaded.advanced.page_size, 20);
    }

    #[test]
    fn invalid_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("settings.json");
        std::fs::write(&file, "{ not json").unwrap();
        assert_eq!(read_settings(&file).download.video_quality, "best");
    }

    #[test]
    fn env_overrides_credentials() {
        let settings = apply_env_overrides(AppSettings::default(), |key| match key {
            CLIENT_ID_ENV => Some("env-id".into()),
            CLIENT_SECRET_ENV => Some("  ".into()),
            _ => None,
        });
        assert_eq!(settings.catalog.client_id, "env-id");
        assert!(settings.catalog.client_secret.is_empty());
    }
}
