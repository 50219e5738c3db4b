//! Webhook credential resolution: keychain first, then environment.
//!
//! Test environments have no keychain entry for this service, so every
//! case exercises the environment fallback.

use agent_bridge::config::GlobalConfig;
use serial_test::serial;

const ENV_KEY: &str = "AGENT_BRIDGE_WEBHOOK_URL";

fn make_config() -> (tempfile::TempDir, GlobalConfig) {
    let temp = tempfile::tempdir().expect("tempdir");
    let toml = format!(
        "data_dir = '{}'\n[agent]\nwork_dir = \"/srv/project\"\n",
        temp.path().to_str().expect("utf8 path").replace('\\', "\\\\")
    );
    let config = GlobalConfig::from_toml_str(&toml).expect("config parses");
    (temp, config)
}

#[tokio::test]
#[serial]
async fn env_var_supplies_webhook_url() {
    let (_temp, mut config) = make_config();
    std::env::set_var(ENV_KEY, "https://hooks.example.invalid/abc");

    config.load_credentials().await.expect("credentials load");
    std::env::remove_var(ENV_KEY);

    assert_eq!(
        config.notifier.webhook_url.as_deref(),
        Some("https://hooks.example.invalid/abc")
    );
}

#[tokio::test]
#[serial]
async fn missing_credential_is_local_only_mode() {
    let (_temp, mut config) = make_config();
    std::env::remove_var(ENV_KEY);

    config.load_credentials().await.expect("absence is not an error");
    assert!(config.notifier.webhook_url.is_none());
}

#[tokio::test]
#[serial]
async fn empty_env_var_is_treated_as_missing() {
    let (_temp, mut config) = make_config();
    std::env::set_var(ENV_KEY, "");

    config.load_credentials().await.expect("credentials load");
    std::env::remove_var(ENV_KEY);

    assert!(config.notifier.webhook_url.is_none());
}
