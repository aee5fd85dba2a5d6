use scout::{
    AssetType, Config, Discovery, Handler, RegistryError, Request,
    testing::{RecordingHandler, TestAsset},
};
use std::time::Duration;

mod common;
use common::settle;

const CONFIG: &str = r#"
[engine]
concurrency = 2
shutdown_grace_ms = 250

[registry]
pipeline_concurrency = 2
handler_timeout_ms = 20
asset_types = ["FQDN"]

[session]
log_capacity = 8
"#;

#[tokio::test]
async fn test_discovery_honours_loaded_config() {
    let path = std::env::temp_dir().join(format!("scout-config-{}.toml", std::process::id()));
    std::fs::write(&path, CONFIG).unwrap();
    let config = Config::load(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    let discovery = Discovery::new(config);
    assert_eq!(discovery.engine().config().concurrency, 2);
    assert_eq!(discovery.registry().asset_types(), [AssetType::Fqdn]);
    assert_eq!(discovery.config().shutdown_grace(), Duration::from_millis(250));

    let err = discovery
        .register_handler(Handler::new("ip", AssetType::IpAddress, RecordingHandler::new()))
        .unwrap_err();
    assert!(matches!(err, RegistryError::InvalidType(AssetType::IpAddress)));

    let session = discovery.create_session();
    assert_eq!(session.config().log_capacity, 8);

    discovery
        .shutdown(discovery.config().shutdown_grace())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_handler_timeout_from_config() {
    let config = Config::from_toml_str(CONFIG).unwrap();
    let discovery = Discovery::new(config);
    let slow = RecordingHandler::with_delay(Duration::from_secs(5));
    let after = RecordingHandler::new();
    discovery
        .register_handler(Handler::new("slow", AssetType::Fqdn, slow.clone()).with_priority(0))
        .unwrap();
    discovery
        .register_handler(Handler::new("after", AssetType::Fqdn, after.clone()).with_priority(1))
        .unwrap();
    discovery.start().unwrap();

    let session = discovery.create_session();
    let mut log = session.subscribe();
    discovery
        .submit(Request::new(session.id(), TestAsset::fqdn("slow.example")))
        .await
        .unwrap();
    settle(&session, 1).await;

    let message = log.recv().await.unwrap();
    assert!(message.contains("handler `slow` failed"), "{message}");
    assert_eq!(slow.count(), 1);
    // The chain stops at the failing stage.
    assert_eq!(after.count(), 0);

    discovery.shutdown(Duration::from_secs(1)).await.unwrap();
}
