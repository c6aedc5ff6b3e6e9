//! High-level client runtime
//!
//! Owns the apartment, the resolver cache, and the ping tracker, and
//! drives the periodic renewal loop that keeps remote leases alive.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::coordinator::{ActivationOutcome, CoordinatorClient, PingTracker, ResolverCache};
use crate::proxy::{Apartment, Facelet};
use crate::transport::Connector;
use crate::types::{Clsid, Iid, OrbError, Result};

/// Client configuration.
#[derive(Clone, Debug)]
pub struct OrbClientConfig {
    /// Interval between renewal passes.
    pub ping_interval: Duration,
    /// Start the renewal loop automatically on first activation.
    pub auto_ping: bool,
}

impl Default for OrbClientConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(60),
            auto_ping: true,
        }
    }
}

/// The client-side runtime.
pub struct OrbClient {
    config: OrbClientConfig,
    connector: Arc<dyn Connector>,
    resolver: Arc<ResolverCache>,
    pings: Arc<PingTracker>,
    apartment: Arc<Apartment>,
    pinger: Mutex<Option<JoinHandle<()>>>,
}

impl OrbClient {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self::with_config(connector, OrbClientConfig::default())
    }

    pub fn with_config(connector: Arc<dyn Connector>, config: OrbClientConfig) -> Self {
        let resolver = Arc::new(ResolverCache::new(connector.clone()));
        let pings = Arc::new(PingTracker::new());
        let apartment = Arc::new(Apartment::new(resolver.clone(), pings.clone()));
        Self {
            config,
            connector,
            resolver,
            pings,
            apartment,
            pinger: Mutex::new(None),
        }
    }

    pub fn apartment(&self) -> &Arc<Apartment> {
        &self.apartment
    }

    pub fn resolver(&self) -> &Arc<ResolverCache> {
        &self.resolver
    }

    pub fn pings(&self) -> &Arc<PingTracker> {
        &self.pings
    }

    /// Coordinator client for a server address.
    pub async fn coordinator(&self, addr: &str) -> Result<CoordinatorClient> {
        let channel = self.connector.connect(addr).await?;
        Ok(CoordinatorClient::new(channel))
    }

    /// Activate a class and consume the returned reference records into
    /// facelets. Each failed interface yields a `None` slot; no usable
    /// proxy comes out of a fully failed activation.
    pub async fn activate(
        &self,
        addr: &str,
        clsid: Clsid,
        iids: Vec<Iid>,
    ) -> Result<(ActivationOutcome, Vec<Option<Arc<Facelet>>>)> {
        let channel = self.connector.connect(addr).await?;
        let coordinator = CoordinatorClient::new(channel.clone());
        let outcome = coordinator.activate(clsid, iids).await?;

        // The activation channel is the resolved route to that exporter;
        // proxies built from the reply reuse it.
        self.resolver.seed(outcome.oxid, channel);

        let mut facelets = Vec::with_capacity(outcome.records.len());
        for record in &outcome.records {
            match record {
                Some(record) => {
                    facelets.push(Some(self.apartment.unmarshal_reference(record).await?))
                }
                None => facelets.push(None),
            }
        }

        if self.config.auto_ping {
            self.start_pinger();
        }
        Ok((outcome, facelets))
    }

    /// Obtain another interface on an object already held.
    pub async fn query_interface(
        &self,
        facelet: &Arc<Facelet>,
        iid: Iid,
    ) -> Result<Arc<Facelet>> {
        let proxy = self
            .apartment
            .get(facelet.oxid(), facelet.oid())
            .ok_or(OrbError::ObjectNotFound(facelet.oid()))?;
        proxy.query_interface(iid).await
    }

    /// Drop one local reference to the proxy behind a facelet.
    pub async fn release(&self, facelet: &Arc<Facelet>) -> Result<()> {
        let proxy = self
            .apartment
            .get(facelet.oxid(), facelet.oid())
            .ok_or(OrbError::ObjectNotFound(facelet.oid()))?;
        self.apartment.release(&proxy).await
    }

    /// One immediate renewal pass.
    pub async fn ping_now(&self) {
        self.pings.ping_all().await;
    }

    /// Start the periodic renewal loop.
    pub fn start_pinger(&self) {
        let mut pinger = self.pinger.lock().unwrap();
        if pinger.is_some() {
            return;
        }
        let pings = self.pings.clone();
        let interval = self.config.ping_interval;
        *pinger = Some(tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            timer.tick().await;
            loop {
                timer.tick().await;
                pings.ping_all().await;
            }
        }));
    }

    /// Stop the renewal loop; held proxies will eventually expire on the
    /// server unless released or re-pinged.
    pub fn shutdown(&self) {
        if let Some(handle) = self.pinger.lock().unwrap().take() {
            handle.abort();
        }
    }
}

impl Drop for OrbClient {
    fn drop(&mut self) {
        if let Some(handle) = self.pinger.lock().unwrap().take() {
            handle.abort();
        }
    }
}
