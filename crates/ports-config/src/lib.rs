use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use directories::BaseDirs;
use merge::Merge;
use serde::Deserialize;
use thiserror::Error;

/// Bind address used for a forward that does not name one.
pub const DEFAULT_BIND: &str = "127.0.0.1";

/// A custom merge strategy for `Option<T>` fields. It overwrites the destination
/// (`left`) with the source (`right`) only if the source is `Some`.
fn overwrite_if_some<T>(left: &mut Option<T>, right: Option<T>) {
    if right.is_some() {
        *left = right;
    }
}

/// Same idea for lists: an empty layer never wipes out the profiles of a lower one.
fn overwrite_if_non_empty<T>(left: &mut Vec<T>, right: Vec<T>) {
    if !right.is_empty() {
        *left = right;
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found at any of the expected locations")]
    NotFound,
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse configuration file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Failed to parse configuration file: {0}")]
    ParseYaml(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("unknown profile '{0}'")]
    UnknownProfile(String),
}

/// One local-to-remote port mapping.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Forward {
    #[serde(default)]
    pub bind: String,
    pub local_port: u16,
    pub remote_host: String,
    pub remote_port: u16,
}

impl Forward {
    /// The bind address handed to ssh. Only an empty value is replaced.
    pub fn bind_or_default(&self) -> &str {
        if self.bind.is_empty() {
            DEFAULT_BIND
        } else {
            &self.bind
        }
    }

    /// Host to dial when checking that the local listener is up. Wildcard
    /// binds are reachable on loopback.
    pub fn probe_host(&self) -> &str {
        match self.bind.as_str() {
            "" | "0.0.0.0" | "::" => DEFAULT_BIND,
            other => other,
        }
    }
}

/// A named SSH target plus its port forwards.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Profile {
    pub name: String,
    pub host: String,
    pub user: String,
    pub key_path: String,
    #[serde(default)]
    pub forwards: Vec<Forward>,
}

impl Profile {
    /// `user@host`, the final ssh argument.
    pub fn target(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

#[derive(Deserialize, Merge, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[merge(strategy = overwrite_if_some)]
    #[serde(default)]
    pub log_level: Option<String>,
    #[merge(strategy = overwrite_if_some)]
    #[serde(default)]
    pub ssh_program: Option<String>,
    #[merge(strategy = overwrite_if_some)]
    #[serde(default)]
    pub log_file: Option<String>,
    #[merge(strategy = overwrite_if_non_empty)]
    #[serde(default)]
    pub profiles: Vec<Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            ssh_program: Some("ssh".to_string()),
            log_file: Some("~/.ports/ports.log".to_string()),
            profiles: Vec::new(),
        }
    }
}

impl Config {
    /// A layer with nothing set, used for CLI overrides.
    pub fn empty() -> Self {
        Self {
            log_level: None,
            ssh_program: None,
            log_file: None,
            profiles: Vec::new(),
        }
    }
}

/// Loads configuration from standard paths.
pub fn load_from_paths() -> Result<Config, ConfigError> {
    let home_dir = BaseDirs::new().map(|dirs| dirs.home_dir().join(".ports"));

    let mut paths_to_check = vec![
        PathBuf::from("./config.yaml"),
        PathBuf::from("./config.yml"),
        PathBuf::from("./config.json"),
    ];
    if let Some(dir) = home_dir {
        paths_to_check.push(dir.join("config.yaml"));
        paths_to_check.push(dir.join("config.json"));
    }

    for path in &paths_to_check {
        if path.exists() {
            return load_from_path(path);
        }
    }

    Err(ConfigError::NotFound)
}

/// Loads and validates a single configuration file. `.json` files are parsed
/// as JSON, everything else as YAML.
pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let config: Config = if is_json {
        serde_json::from_str(&content)?
    } else {
        serde_yaml::from_str(&content)?
    };

    validate(&config)?;
    Ok(config)
}

/// Checks the invariants the supervisor relies on: required fields, unique
/// profile names and ports in range.
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    let mut seen = HashSet::with_capacity(config.profiles.len());

    for (i, p) in config.profiles.iter().enumerate() {
        let profile_path = format!("profiles[{}]", i);

        if p.name.trim().is_empty() {
            return Err(invalid(format!("{}.name is required", profile_path)));
        }
        if !seen.insert(p.name.as_str()) {
            return Err(invalid(format!("duplicate profile name {:?}", p.name)));
        }
        if p.host.trim().is_empty() {
            return Err(invalid(format!("{}.host is required", profile_path)));
        }
        if p.user.trim().is_empty() {
            return Err(invalid(format!("{}.user is required", profile_path)));
        }
        if p.key_path.trim().is_empty() {
            return Err(invalid(format!("{}.keyPath is required", profile_path)));
        }

        for (j, f) in p.forwards.iter().enumerate() {
            let forward_path = format!("{}.forwards[{}]", profile_path, j);
            if f.remote_host.trim().is_empty() {
                return Err(invalid(format!("{}.remoteHost is required", forward_path)));
            }
            // u16 already caps the upper bound at parse time.
            if f.local_port == 0 {
                return Err(invalid(format!(
                    "{}.localPort must be between 1 and 65535",
                    forward_path
                )));
            }
            if f.remote_port == 0 {
                return Err(invalid(format!(
                    "{}.remotePort must be between 1 and 65535",
                    forward_path
                )));
            }
        }
    }

    Ok(())
}

fn invalid(msg: String) -> ConfigError {
    ConfigError::Invalid(msg)
}

pub fn find_profile<'a>(config: &'a Config, name: &str) -> Option<&'a Profile> {
    config.profiles.iter().find(|p| p.name == name)
}

/// Like [`find_profile`], but an unknown name is an error.
pub fn require_profile<'a>(config: &'a Config, name: &str) -> Result<&'a Profile, ConfigError> {
    find_profile(config, name).ok_or_else(|| ConfigError::UnknownProfile(name.to_string()))
}

/// Resolves a path that starts with `~/` against the home directory. Anything
/// else, or a path on a system without a home directory, is returned as is.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(dirs) = BaseDirs::new() {
            return dirs.home_dir().join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(name: &str, content: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let mut file = fs::File::create(dir.path().join(name)).unwrap();
        file.write_all(content.trim().as_bytes()).unwrap();
        dir
    }

    #[test]
    fn test_load_yaml_profiles() {
        let dir = write_config(
            "config.yaml",
            r#"
log_level: debug
profiles:
  - name: db
    host: db.example.com
    user: sam
    keyPath: ~/.ssh/id_rsa
    forwards:
      - localPort: 5432
        remoteHost: 127.0.0.1
        remotePort: 5432
      - bind: 0.0.0.0
        localPort: 6379
        remoteHost: cache.internal
        remotePort: 6379
"#,
        );

        let config = load_from_path(dir.path().join("config.yaml")).unwrap();
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.ssh_program, None);

        let db = find_profile(&config, "db").unwrap();
        assert_eq!(db.target(), "sam@db.example.com");
        assert_eq!(db.forwards.len(), 2);
        assert_eq!(db.forwards[0].bind_or_default(), "127.0.0.1");
        assert_eq!(db.forwards[1].bind_or_default(), "0.0.0.0");
        assert_eq!(db.forwards[1].probe_host(), "127.0.0.1");
    }

    #[test]
    fn test_load_json_profiles() {
        let dir = write_config(
            "config.json",
            r#"{
  "ssh_program": "/usr/bin/ssh",
  "profiles": [
    { "name": "web", "host": "h", "user": "u", "keyPath": "/k",
      "forwards": [{ "bind": "::", "localPort": 8080, "remoteHost": "localhost", "remotePort": 80 }] }
  ]
}"#,
        );

        let config = load_from_path(dir.path().join("config.json")).unwrap();
        assert_eq!(config.ssh_program.as_deref(), Some("/usr/bin/ssh"));
        let web = require_profile(&config, "web").unwrap();
        assert_eq!(web.forwards[0].probe_host(), "127.0.0.1");
        assert_eq!(web.forwards[0].bind_or_default(), "::");
    }

    #[test]
    fn test_rejects_duplicate_profile_names() {
        let dir = write_config(
            "config.yaml",
            r#"
profiles:
  - name: dup
    host: a.example.com
    user: sam
    keyPath: ~/.ssh/id_rsa
    forwards:
      - localPort: 5432
        remoteHost: 127.0.0.1
        remotePort: 5432
  - name: dup
    host: b.example.com
    user: sam
    keyPath: ~/.ssh/id_rsa
"#,
        );

        let err = load_from_path(dir.path().join("config.yaml")).unwrap_err();
        assert!(err.to_string().contains("duplicate profile name"), "{}", err);
    }

    #[test]
    fn test_rejects_invalid_forward_port() {
        let dir = write_config(
            "config.yaml",
            r#"
profiles:
  - name: db
    host: db.example.com
    user: sam
    keyPath: ~/.ssh/id_rsa
    forwards:
      - localPort: 0
        remoteHost: 127.0.0.1
        remotePort: 5432
"#,
        );

        let err = load_from_path(dir.path().join("config.yaml")).unwrap_err();
        assert!(
            err.to_string()
                .contains("profiles[0].forwards[0].localPort must be between 1 and 65535"),
            "{}",
            err
        );
    }

    #[test]
    fn test_rejects_out_of_range_port_at_parse_time() {
        let dir = write_config(
            "config.yaml",
            r#"
profiles:
  - name: db
    host: db.example.com
    user: sam
    keyPath: ~/.ssh/id_rsa
    forwards:
      - localPort: 70000
        remoteHost: 127.0.0.1
        remotePort: 5432
"#,
        );

        let err = load_from_path(dir.path().join("config.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::ParseYaml(_)));
    }

    #[test]
    fn test_rejects_missing_host() {
        let config = Config {
            profiles: vec![Profile {
                name: "db".to_string(),
                host: "  ".to_string(),
                user: "sam".to_string(),
                key_path: "/k".to_string(),
                forwards: Vec::new(),
            }],
            ..Config::empty()
        };
        let err = validate(&config).unwrap_err();
        assert_eq!(err.to_string(), "Invalid configuration: profiles[0].host is required");
    }

    #[test]
    fn test_missing_explicit_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_from_path(dir.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_unknown_profile() {
        let err = require_profile(&Config::default(), "ghost").unwrap_err();
        assert_eq!(err.to_string(), "unknown profile 'ghost'");
    }

    #[test]
    fn test_expand_tilde() {
        let home = BaseDirs::new().unwrap().home_dir().to_path_buf();
        assert_eq!(expand_tilde("~/.ssh/id_rsa"), home.join(".ssh/id_rsa"));
        assert_eq!(expand_tilde("/etc/key"), PathBuf::from("/etc/key"));
        assert_eq!(expand_tilde("~other/key"), PathBuf::from("~other/key"));
        assert_eq!(expand_tilde(""), PathBuf::from(""));
    }

    #[test]
    fn test_config_precedence() {
        // 1. Start with defaults
        let mut final_config = Config::default();
        assert_eq!(final_config.log_level, Some("info".to_string()));
        assert_eq!(final_config.ssh_program, Some("ssh".to_string()));

        // 2. Create a "file" config layer
        let file_config = Config {
            log_level: Some("debug".to_string()),
            profiles: vec![Profile {
                name: "db".to_string(),
                host: "db.example.com".to_string(),
                user: "sam".to_string(),
                key_path: "~/.ssh/id_rsa".to_string(),
                forwards: Vec::new(),
            }],
            ..Config::empty()
        };

        final_config.merge(file_config);
        assert_eq!(final_config.log_level, Some("debug".to_string()));
        assert_eq!(final_config.profiles.len(), 1);

        // 3. Create a "CLI" config layer
        let cli_config = Config {
            ssh_program: Some("/opt/ssh".to_string()),
            ..Config::empty()
        };

        final_config.merge(cli_config);

        assert_eq!(final_config.log_level, Some("debug".to_string()));
        assert_eq!(final_config.ssh_program, Some("/opt/ssh".to_string()));
        assert_eq!(final_config.log_file, Some("~/.ports/ports.log".to_string()));
        assert_eq!(final_config.profiles.len(), 1);
    }
}
