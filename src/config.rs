use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        // Загружаем из переменных окружения или используем дефолты
        let config = Config {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8000".to_string())
                    .parse()
                    .unwrap_or(8000),
            },
            data_dir: env::var("APP_LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/tmp/logs")),
        };

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            anyhow::bail!("APP_LOG_DIR must not be empty");
        }

        Ok(())
    }

    /// Создает директорию логов, при неудаче откатывается на /tmp/logs.
    /// Никогда не мешает запуску сервера.
    pub fn ensure_data_dir(&mut self) {
        if let Err(e) = fs::create_dir_all(&self.data_dir) {
            log::warn!(
                "Could not create {}, falling back to /tmp/logs: {}",
                self.data_dir.display(),
                e
            );
            self.data_dir = PathBuf::from("/tmp/logs");
            if let Err(e) = fs::create_dir_all(&self.data_dir) {
                log::error!("Failed to create fallback log dir: {}", e);
            }
        }
    }

    /// Проверка прав записи в директорию данных. "writable" или причина отказа.
    pub fn write_test(&self) -> String {
        let test_file = self.data_dir.join("test_health.txt");
        match fs::write(&test_file, "test") {
            Ok(()) => {
                let _ = fs::remove_file(&test_file);
                "writable".to_string()
            }
            Err(e) => format!("not writable: {}", e),
        }
    }
}
