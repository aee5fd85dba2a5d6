use scout::{
    AssetType, BoxError, Config, Discovery, Handler, HandlerRegistrar, Plugin, RegistryError,
    Request,
    testing::{RecordingHandler, TestAsset},
};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

mod common;
use common::settle;

struct DnsPlugin {
    recorder: RecordingHandler,
    stopped: Arc<Mutex<bool>>,
}

impl Plugin for DnsPlugin {
    fn name(&self) -> &str {
        "dns"
    }

    fn start(&self, registrar: &dyn HandlerRegistrar) -> Result<(), BoxError> {
        registrar.register_handler(
            Handler::new("dns-a", AssetType::Fqdn, self.recorder.clone())
                .with_plugin("dns")
                .with_priority(1),
        )?;
        Ok(())
    }

    fn stop(&self) {
        *self.stopped.lock().unwrap() = true;
    }
}

struct MisconfiguredPlugin;

impl Plugin for MisconfiguredPlugin {
    fn name(&self) -> &str {
        "shodan"
    }

    fn start(&self, _registrar: &dyn HandlerRegistrar) -> Result<(), BoxError> {
        Err("api key missing".into())
    }
}

/// Registers for a type the registry does not route.
struct OffScopePlugin;

impl Plugin for OffScopePlugin {
    fn name(&self) -> &str {
        "whois"
    }

    fn start(&self, registrar: &dyn HandlerRegistrar) -> Result<(), BoxError> {
        registrar.register_handler(Handler::new(
            "whois",
            AssetType::DomainRecord,
            RecordingHandler::new(),
        ))?;
        Ok(())
    }
}

#[tokio::test]
async fn test_failed_plugins_do_not_stop_the_rest() {
    let mut config = Config::default();
    config.registry.asset_types = vec![AssetType::Fqdn];
    let discovery = Discovery::new(config);

    let recorder = RecordingHandler::new();
    let stopped = Arc::new(Mutex::new(false));
    let failures = discovery.load_plugins([
        Arc::new(MisconfiguredPlugin) as Arc<dyn Plugin>,
        Arc::new(DnsPlugin {
            recorder: recorder.clone(),
            stopped: stopped.clone(),
        }),
        Arc::new(OffScopePlugin),
    ]);

    let mut failed: Vec<_> = failures.iter().map(|f| f.name.as_str()).collect();
    failed.sort();
    assert_eq!(failed, ["shodan", "whois"]);
    let off_scope = failures.iter().find(|f| f.name == "whois").unwrap();
    let registry_error = off_scope.source.downcast_ref::<RegistryError>().unwrap();
    assert!(matches!(
        registry_error,
        RegistryError::InvalidType(AssetType::DomainRecord)
    ));
    assert_eq!(discovery.plugin_names(), ["dns"]);

    // load_plugins already built the pipeline.
    let pipeline = discovery.registry().get_pipeline(AssetType::Fqdn).unwrap();
    assert_eq!(pipeline.stage_names(), ["dns-a"]);

    discovery.start().unwrap();
    let session = discovery.create_session();
    discovery
        .submit(Request::new(session.id(), TestAsset::fqdn("example.org")))
        .await
        .unwrap();
    settle(&session, 1).await;
    assert_eq!(recorder.keys(), ["example.org"]);

    discovery.shutdown(Duration::from_secs(1)).await.unwrap();
    assert!(*stopped.lock().unwrap());
    assert!(discovery.plugin_names().is_empty());
}

#[tokio::test]
async fn test_handler_priority_orders_pipeline() {
    let discovery = Discovery::new(Config::default());
    let order = Arc::new(Mutex::new(Vec::new()));

    for (name, priority) in [("late", 9), ("early", 1), ("middle", 5)] {
        let order = order.clone();
        let handler = move |_event: scout::Event| {
            let order = order.clone();
            async move {
                order.lock().unwrap().push(name);
                Ok::<(), BoxError>(())
            }
        };
        discovery
            .register_handler(Handler::new(name, AssetType::Fqdn, handler).with_priority(priority))
            .unwrap();
    }
    discovery.start().unwrap();

    let session = discovery.create_session();
    discovery
        .submit(Request::new(session.id(), TestAsset::fqdn("ordered.example")))
        .await
        .unwrap();
    settle(&session, 1).await;

    assert_eq!(*order.lock().unwrap(), ["early", "middle", "late"]);
    discovery.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_duplicate_registration_is_rejected() {
    let discovery = Discovery::new(Config::default());
    discovery
        .register_handler(Handler::new("dup", AssetType::Fqdn, RecordingHandler::new()))
        .unwrap();
    let err = discovery
        .register_handler(Handler::new("dup", AssetType::Fqdn, RecordingHandler::new()))
        .unwrap_err();
    assert!(matches!(err, RegistryError::DuplicateHandler { .. }));
    discovery.shutdown(Duration::ZERO).await.unwrap();
}

/// Registers one handler once per record type it serves.
struct MultiRecordPlugin {
    recorder: RecordingHandler,
}

impl Plugin for MultiRecordPlugin {
    fn name(&self) -> &str {
        "dns-records"
    }

    fn start(&self, registrar: &dyn HandlerRegistrar) -> Result<(), BoxError> {
        let handler = Handler::new("dns-lookup", AssetType::Fqdn, self.recorder.clone());
        for record in ["A", "AAAA", "CNAME"] {
            registrar.register_handler(handler.clone().with_transform(record))?;
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_handler_registered_per_transform_runs_once_per_event() {
    let discovery = Discovery::new(Config::default());
    let recorder = RecordingHandler::new();
    let failures = discovery.load_plugins([Arc::new(MultiRecordPlugin {
        recorder: recorder.clone(),
    }) as Arc<dyn Plugin>]);
    assert!(failures.is_empty());

    let pipeline = discovery.registry().get_pipeline(AssetType::Fqdn).unwrap();
    assert_eq!(pipeline.stage_names(), ["dns-lookup"]);

    discovery.start().unwrap();
    let session = discovery.create_session();
    discovery
        .submit(Request::new(session.id(), TestAsset::fqdn("multi.example")))
        .await
        .unwrap();
    settle(&session, 1).await;

    assert_eq!(recorder.keys(), ["multi.example"]);
    discovery.shutdown(Duration::from_secs(1)).await.unwrap();
}
