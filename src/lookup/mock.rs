//! In-memory geocoder for tests and dry runs.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::lookup::client::ReverseGeocoder;
use crate::lookup::error::LookupError;
use crate::types::{EnrichedRecord, GeoQuery};

type Responder = dyn Fn(&GeoQuery) -> Result<EnrichedRecord, LookupError> + Send + Sync;

/// Scripted [`ReverseGeocoder`]. Answers every call through a responder
/// closure and records call statistics.
pub struct MockGeocoder {
    responder: Box<Responder>,
    latency: Option<Duration>,
    gate: Option<Arc<Semaphore>>,
    calls: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    seen_codes: Mutex<Vec<Option<String>>>,
}

impl MockGeocoder {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&GeoQuery) -> Result<EnrichedRecord, LookupError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            latency: None,
            gate: None,
            calls: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            seen_codes: Mutex::new(Vec::new()),
        }
    }

    /// Always answers with `record`, carrying the query's code.
    pub fn fixed(record: EnrichedRecord) -> Self {
        Self::new(move |query| {
            Ok(EnrichedRecord {
                code: query.code.clone(),
                ..record.clone()
            })
        })
    }

    /// Sleeps for `latency` inside every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Every call holds one permit of `gate` before answering; a gate with
    /// no permits blocks all calls until permits are added.
    pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of calls observed running at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn seen_codes(&self) -> Vec<Option<String>> {
        self.seen_codes.lock().clone()
    }
}

#[async_trait]
impl ReverseGeocoder for MockGeocoder {
    async fn reverse(&self, query: &GeoQuery) -> Result<EnrichedRecord, LookupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _in_flight = InFlight::enter(&self.in_flight, &self.peak_in_flight);
        self.seen_codes.lock().push(query.code.clone());

        if let Some(gate) = &self.gate {
            // closed gate means the test is tearing down
            let _permit = gate.acquire().await;
        }
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        (self.responder)(query)
    }
}

/// Holds one in-flight slot; released on drop, including when the responder
/// panics or the call is cancelled.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(in_flight: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(current, Ordering::SeqCst);
        Self(in_flight)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
