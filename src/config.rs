use std::path::PathBuf;

/// Application-level constants
pub const APP_NAME: &str = "Dermascreen";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get the application data directory
/// ~/Dermascreen/ on all platforms (user-visible)
pub fn app_data_dir() -> PathBuf {
    let home = dirs::home_dir().expect("Cannot determine home directory");
    home.join("Dermascreen")
}

/// Get the path of the main SQLite database
pub fn database_path() -> PathBuf {
    app_data_dir().join("dermascreen.db")
}

/// Default tracing filter when RUST_LOG is not set
pub fn default_log_filter() -> &'static str {
    "info,dermascreen=debug"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_data_dir_under_home() {
        let dir = app_data_dir();
        let home = dirs::home_dir().unwrap();
        assert!(dir.starts_with(home));
        assert!(dir.ends_with("Dermascreen"));
    }

    #[test]
    fn database_path_under_app_data() {
        let db = database_path();
        let app = app_data_dir();
        assert!(db.starts_with(app));
        assert!(db.ends_with("dermascreen.db"));
    }

    #[test]
    fn app_name_is_dermascreen() {
        assert_eq!(APP_NAME, "Dermascreen");
    }

    #[test]
    fn app_version_matches_cargo() {
        assert_eq!(APP_VERSION, "0.3.0");
    }
}
