#![allow(dead_code)]

use scout::{
    Asset, AssetType, BoxError, Config, Discovery, Flow, Handler, IntakeContext, IntakeHandler,
    Response, Session,
    testing::{RecordingHandler, TestAsset},
};
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

pub const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// Assembly
// ============================================================================

/// A discovery instance with one recorder per routed type.
pub struct Harness {
    pub discovery: Discovery,
    pub fqdns: RecordingHandler,
    pub ips: RecordingHandler,
}

impl Harness {
    pub fn new(config: Config) -> Self {
        let discovery = Discovery::new(config);
        let fqdns = RecordingHandler::new();
        let ips = RecordingHandler::new();
        discovery
            .register_handler(Handler::new("fqdn-recorder", AssetType::Fqdn, fqdns.clone()))
            .unwrap();
        discovery
            .register_handler(Handler::new("ip-recorder", AssetType::IpAddress, ips.clone()))
            .unwrap();
        Self {
            discovery,
            fqdns,
            ips,
        }
    }
}

// ============================================================================
// Waiting
// ============================================================================

/// Wait until `session` has accepted `total` events and finished all of them.
pub async fn settle(session: &Session, total: u64) {
    tokio::time::timeout(WAIT, async {
        while session.stats().work_items_total < total {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        session.wait_idle().await;
    })
    .await
    .expect("session did not settle");
}

/// Poll `condition` until it holds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never held");
}

// ============================================================================
// Resolver middleware
// ============================================================================

type Answers = HashMap<String, Vec<(&'static str, Arc<dyn Asset>)>>;

/// Intake middleware answering from fixed tables of A and PTR records.
#[derive(Clone, Default)]
pub struct StaticResolver {
    answers: Arc<Answers>,
    calls: Arc<AtomicUsize>,
}

impl StaticResolver {
    /// A records: each name resolves to the listed addresses.
    pub fn new(records: &[(&str, &[&str])]) -> Self {
        Self::default().with_a_records(records)
    }

    pub fn with_a_records(self, records: &[(&str, &[&str])]) -> Self {
        self.with_answers(records, "a_record", |a| TestAsset::ip(a))
    }

    /// PTR records: each address points back at the listed names.
    pub fn with_ptr_records(self, records: &[(&str, &[&str])]) -> Self {
        self.with_answers(records, "ptr_record", |n| TestAsset::fqdn(n))
    }

    /// Requests this resolver has seen.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn with_answers(
        mut self,
        records: &[(&str, &[&str])],
        relation: &'static str,
        asset: impl Fn(&str) -> Arc<dyn Asset>,
    ) -> Self {
        let answers = Arc::make_mut(&mut self.answers);
        for (key, values) in records {
            answers
                .entry(key.to_string())
                .or_default()
                .extend(values.iter().map(|v| (relation, asset(v))));
        }
        self
    }
}

impl IntakeHandler for StaticResolver {
    async fn handle(&self, ctx: &IntakeContext) -> Result<Flow, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let asset = &ctx.request.asset;
        let Some(answers) = self.answers.get(&asset.key()) else {
            return Ok(Flow::Next);
        };
        for (relation, discovered) in answers {
            ctx.responses.push(Response::discovered(
                ctx.request.session_id,
                asset.clone(),
                *relation,
                discovered.clone(),
            ));
        }
        Ok(Flow::Next)
    }
}
