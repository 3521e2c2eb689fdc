use directories::ProjectDirs;
use std::path::PathBuf;

/// Application directories following XDG spec
#[derive(Debug, Clone)]
pub struct Directories {
    /// Config directory (~/.config/starwire)
    pub config: PathBuf,

    /// Log directory (~/.local/share/starwire/logs)
    pub logs: PathBuf,

    /// Config file path
    pub config_file: PathBuf,
}

impl Directories {
    /// Create a new `Directories` instance with standard XDG paths.
    ///
    /// Falls back to a directory under the system temp dir when no home
    /// directory can be determined.
    #[must_use]
    pub fn new() -> Self {
        let Some(project) = ProjectDirs::from("", "", "starwire") else {
            return Self::with_base(std::env::temp_dir().join("starwire"));
        };

        let config = project.config_dir().to_path_buf();
        Self {
            config_file: config.join("config.json"),
            logs: project.data_local_dir().join("logs"),
            config,
        }
    }

    #[must_use]
    pub fn with_base(base: PathBuf) -> Self {
        Self {
            config_file: base.join("config.json"),
            logs: base.join("logs"),
            config: base,
        }
    }

    /// Ensure all directories exist.
    ///
    /// # Errors
    ///
    /// Returns an error if any directory cannot be created.
    pub fn ensure_exists(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.config)?;
        std::fs::create_dir_all(&self.logs)?;
        Ok(())
    }
}

impl Default for Directories {
    fn default() -> Self {
        Self::new()
    }
}
