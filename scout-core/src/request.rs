//! Intake requests and the responses handlers produce for them.

use crate::{asset::Asset, id::SessionId};
use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

/// How a requested asset was reached.
#[derive(Debug, Clone)]
pub struct Origin {
    /// The asset that led here.
    pub source: Arc<dyn Asset>,
    /// Relation name, e.g. `"a_record"`.
    pub relation: String,
}

/// Ask the engine to process one asset in one session.
#[derive(Debug, Clone)]
pub struct Request {
    /// Owning session.
    pub session_id: SessionId,
    /// Target asset.
    pub asset: Arc<dyn Asset>,
    /// Where the asset came from, for requests produced by follow-ups.
    pub origin: Option<Origin>,
}

impl Request {
    /// A request with no origin.
    pub fn new(session_id: SessionId, asset: Arc<dyn Asset>) -> Self {
        Self {
            session_id,
            asset,
            origin: None,
        }
    }

    /// Record how the asset was reached.
    pub fn with_origin(mut self, source: Arc<dyn Asset>, relation: impl Into<String>) -> Self {
        self.origin = Some(Origin {
            source,
            relation: relation.into(),
        });
        self
    }
}

/// Produces a follow-up request once the current one has been handled.
pub type FollowUp = Box<dyn FnOnce() -> Option<Request> + Send>;

/// One discovered relation between two assets.
#[derive(Debug, Clone)]
pub struct Edge {
    /// The asset being processed.
    pub source: Arc<dyn Asset>,
    /// Relation name.
    pub relation: String,
    /// The newly found asset.
    pub discovered: Arc<dyn Asset>,
}

/// A discovery result plus the requests it should trigger.
pub struct Response {
    /// The asset being processed.
    pub source: Arc<dyn Asset>,
    /// Relation name.
    pub relation: String,
    /// The newly found asset.
    pub discovered: Arc<dyn Asset>,
    /// Generators for further requests. A `None` result is ignored.
    pub follow_ups: Vec<FollowUp>,
}

impl Response {
    /// A response with no follow-ups.
    pub fn new(
        source: Arc<dyn Asset>,
        relation: impl Into<String>,
        discovered: Arc<dyn Asset>,
    ) -> Self {
        Self {
            source,
            relation: relation.into(),
            discovered,
            follow_ups: Vec::new(),
        }
    }

    /// A response whose single follow-up requests `discovered` in `session_id`.
    pub fn discovered(
        session_id: SessionId,
        source: Arc<dyn Asset>,
        relation: impl Into<String>,
        discovered: Arc<dyn Asset>,
    ) -> Self {
        let relation = relation.into();
        let request = Request::new(session_id, discovered.clone())
            .with_origin(source.clone(), relation.clone());
        Self::new(source, relation, discovered).with_follow_up(move || Some(request))
    }

    /// Add a follow-up generator.
    pub fn with_follow_up(mut self, f: impl FnOnce() -> Option<Request> + Send + 'static) -> Self {
        self.follow_ups.push(Box::new(f));
        self
    }

    /// The relation this response records.
    pub fn edge(&self) -> Edge {
        Edge {
            source: self.source.clone(),
            relation: self.relation.clone(),
            discovered: self.discovered.clone(),
        }
    }

    /// Run every follow-up generator, keeping the requests they produce.
    pub fn into_requests(self) -> Vec<Request> {
        self.follow_ups.into_iter().filter_map(|f| f()).collect()
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("source", &self.source)
            .field("relation", &self.relation)
            .field("discovered", &self.discovered)
            .field("follow_ups", &self.follow_ups.len())
            .finish()
    }
}

/// Thread-safe collection of responses for one request.
#[derive(Debug, Default)]
pub struct Responses(Mutex<Vec<Response>>);

impl Responses {
    /// An empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a response.
    pub fn push(&self, response: Response) {
        self.lock().push(response);
    }

    /// Number of responses collected.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing was collected.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Snapshot of the recorded relations.
    pub fn edges(&self) -> Vec<Edge> {
        self.lock().iter().map(Response::edge).collect()
    }

    /// Take every response, leaving the collection empty.
    pub fn take(&self) -> Vec<Response> {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Response>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::AssetType;

    #[derive(Debug)]
    struct Ip(&'static str);

    impl Asset for Ip {
        fn asset_type(&self) -> AssetType {
            AssetType::IpAddress
        }
        fn key(&self) -> String {
            self.0.to_string()
        }
    }

    #[test]
    fn test_discovered_requests_the_new_asset() {
        let session = SessionId::new();
        let response = Response::discovered(
            session,
            Arc::new(Ip("192.0.2.1")),
            "ptr",
            Arc::new(Ip("192.0.2.2")),
        );

        let requests = response.into_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].session_id, session);
        assert_eq!(requests[0].asset.key(), "192.0.2.2");
        let origin = requests[0].origin.as_ref().unwrap();
        assert_eq!(origin.source.key(), "192.0.2.1");
        assert_eq!(origin.relation, "ptr");
    }

    #[test]
    fn test_none_follow_ups_are_skipped() {
        let response = Response::new(Arc::new(Ip("a")), "r", Arc::new(Ip("b")))
            .with_follow_up(|| None)
            .with_follow_up(|| None);
        assert!(response.into_requests().is_empty());
    }

    #[test]
    fn test_responses_take_empties() {
        let responses = Responses::new();
        responses.push(Response::new(Arc::new(Ip("a")), "r", Arc::new(Ip("b"))));
        responses.push(Response::new(Arc::new(Ip("a")), "r", Arc::new(Ip("c"))));

        let edges = responses.edges();
        assert_eq!(edges[1].discovered.key(), "c");
        assert_eq!(responses.take().len(), 2);
        assert!(responses.is_empty());
    }
}
