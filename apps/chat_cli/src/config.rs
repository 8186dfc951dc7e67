use std::{collections::HashMap, fs};

#[derive(Debug, Clone)]
pub struct Settings {
    pub server_url: String,
    pub token: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8443".into(),
            token: String::new(),
        }
    }
}

/// Layered settings: defaults, then `chat.toml` in the working directory,
/// then environment overrides.
pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("chat.toml") {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            apply_file(&mut settings, &file_cfg);
        }
    }

    if let Ok(v) = std::env::var("CHAT_SERVER_URL") {
        settings.server_url = v;
    }
    if let Ok(v) = std::env::var("CHAT_TOKEN") {
        settings.token = v;
    }

    settings
}

fn apply_file(settings: &mut Settings, file_cfg: &HashMap<String, String>) {
    if let Some(v) = file_cfg.get("server_url") {
        settings.server_url = v.clone();
    }
    if let Some(v) = file_cfg.get("token") {
        settings.token = v.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_values_override_defaults() {
        let mut settings = Settings::default();
        let file_cfg: HashMap<String, String> =
            toml::from_str("server_url = \"https://chat.example.com\"\ntoken = \"tok\"")
                .expect("toml");
        apply_file(&mut settings, &file_cfg);

        assert_eq!(settings.server_url, "https://chat.example.com");
        assert_eq!(settings.token, "tok");
    }
}
