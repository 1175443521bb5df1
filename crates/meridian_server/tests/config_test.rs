use meridian_quota::hash_token;
use meridian_server::{LogFormat, MeridianConfig};
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_file_overrides_bundled_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("meridian.toml");
    let contents = format!(
        r#"
[server]
bind = "127.0.0.1:9000"
debug = true

[media]
cache_dir = "/var/cache/meridian"
sweep_interval_secs = 60
cdn_base = "https://cdn.example/media"

[discord]
bot_token = "bot"

[logging]
format = "json"

[[quota.accounts]]
name = "melanie"
token_sha256 = "{}"
scopes = ["instagram", "tiktok"]
"#,
        hash_token("secret")
    );
    std::fs::write(&path, contents).unwrap();

    let config = MeridianConfig::from_file(&path).unwrap();
    assert_eq!(config.server().bind(), "127.0.0.1:9000");
    assert!(*config.server().debug());
    assert_eq!(config.media().sweep_interval(), Duration::from_secs(60));
    assert_eq!(config.media().cache().cdn_base(), "https://cdn.example/media");
    // Keys the file leaves out keep their bundled values.
    assert_eq!(*config.media().cache().default_ttl_secs(), 691_200);
    assert_eq!(*config.database().pool_size(), 8);
    assert_eq!(config.discord().bot_token().as_deref(), Some("bot"));
    assert_eq!(*config.logging().format(), LogFormat::Json);

    let accounts = config.quota().accounts();
    assert_eq!(accounts.len(), 1);
    assert!(accounts[0].matches_token("secret"));
    assert!(accounts[0].allows("tiktok"));
    assert!(!accounts[0].allows("snapchat"));
}

#[test]
fn test_missing_file_is_config_error() {
    let dir = TempDir::new().unwrap();
    let err = MeridianConfig::from_file(dir.path().join("absent.toml")).unwrap_err();
    assert!(err.to_string().contains("absent.toml"));
}
