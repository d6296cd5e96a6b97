use ble_channel_bridge_lib::config::AppConfig;
use tempfile::tempdir;

#[tokio::test]
async fn missing_file_yields_defaults() {
    let dir = tempdir().unwrap();
    let config = AppConfig::load_config(dir.path().join("absent.json"))
        .await
        .unwrap();
    assert_eq!(config, AppConfig::default());
}

#[tokio::test]
async fn saved_config_loads_back() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("bridge_config.json");

    let mut config = AppConfig::default();
    config.channel.topic = "hm:lab".into();
    config.bridge.serialize_characteristic_ops = true;
    config.host.scan_timeout_ms = 2_500;
    config.save_config(&path).await.unwrap();

    let loaded = AppConfig::load_config(&path).await.unwrap();
    assert_eq!(loaded, config);
    assert!(loaded.validate().is_ok());
}

#[tokio::test]
async fn unreadable_file_is_an_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("broken.json");
    tokio::fs::write(&path, "{ not json").await.unwrap();
    assert!(AppConfig::load_config(&path).await.is_err());
}
