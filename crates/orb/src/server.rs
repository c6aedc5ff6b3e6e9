//! High-level server runtime
//!
//! Wires the exporter, coordinator, remote reference-counting service,
//! and the background lease sweeper into one hostable unit.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::dispatch::Dispatcher;
use crate::exporter::{Exporter, ServerObject, DEFAULT_PING_PERIOD, DEFAULT_PING_TIMEOUT_PERIODS};
use crate::registry::{ClassFactory, InProcRegistry};
use crate::transport::loopback::LoopbackHub;
use crate::types::{Clsid, DualStringArray, Iid, Oid, RefRecord, Result, StringBinding};

/// Server configuration.
#[derive(Clone, Debug)]
pub struct OrbServerConfig {
    /// Binding advertised in every exported reference record.
    pub binding: StringBinding,
    /// Lease renewal period granted to ping clients.
    pub ping_period: Duration,
    /// Missed periods before an object is reclaimed.
    pub ping_timeout_periods: u32,
    /// Granularity of the background sweeper.
    pub sweep_interval: Duration,
}

impl OrbServerConfig {
    pub fn new(binding: StringBinding) -> Self {
        Self {
            binding,
            ping_period: DEFAULT_PING_PERIOD,
            ping_timeout_periods: DEFAULT_PING_TIMEOUT_PERIODS,
            sweep_interval: Duration::from_secs(2),
        }
    }

    fn lease_timeout(&self) -> Duration {
        self.ping_period * self.ping_timeout_periods
    }
}

/// The hostable server runtime.
pub struct OrbServer {
    config: OrbServerConfig,
    exporter: Arc<Exporter>,
    registry: Arc<InProcRegistry>,
    dispatcher: Arc<Dispatcher>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl OrbServer {
    pub fn new(config: OrbServerConfig) -> Self {
        let bindings = DualStringArray::with_binding(config.binding.clone());
        let exporter = Arc::new(Exporter::new(bindings, config.lease_timeout()));
        let registry = Arc::new(InProcRegistry::new());
        let registry_seam: Arc<dyn crate::registry::ClassRegistry> = registry.clone();
        let dispatcher = Arc::new(Dispatcher::new(exporter.clone(), registry_seam));
        Self {
            config,
            exporter,
            registry,
            dispatcher,
            sweeper: Mutex::new(None),
        }
    }

    pub fn exporter(&self) -> &Arc<Exporter> {
        &self.exporter
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.dispatcher.clone()
    }

    pub fn oxid(&self) -> crate::types::Oxid {
        self.exporter.oxid()
    }

    /// Make a class activatable.
    pub fn register_class(&self, clsid: Clsid, factory: Arc<dyn ClassFactory>) {
        self.registry.register(clsid, factory);
    }

    /// Make a class activatable from a constructor closure.
    pub fn register_class_fn<F>(&self, clsid: Clsid, make: F)
    where
        F: Fn() -> Arc<dyn ServerObject> + Send + Sync + 'static,
    {
        self.registry.register_fn(clsid, make);
    }

    /// Export a pre-built object directly, outside activation.
    pub fn export_object(
        &self,
        object: Arc<dyn ServerObject>,
        clsid: Clsid,
        iid: Iid,
        refs: u32,
    ) -> Result<RefRecord> {
        self.exporter.export(object, clsid, iid, refs)
    }

    /// Exempt an object from lease expiry.
    pub fn pin_object(&self, oid: Oid) -> Result<()> {
        self.exporter.table().set_never_expires(oid, true)
    }

    /// Bind this server's dispatcher into a loopback hub.
    pub fn attach(&self, hub: &LoopbackHub) {
        hub.bind(self.config.binding.network_addr.clone(), self.dispatcher());
    }

    /// Start the background lease sweeper.
    pub fn start(&self) {
        let mut sweeper = self.sweeper.lock().unwrap();
        if sweeper.is_some() {
            return;
        }
        let exporter = self.exporter.clone();
        let tick = self.config.sweep_interval;
        *sweeper = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it so the first
            // decrement happens one full period in.
            interval.tick().await;
            loop {
                interval.tick().await;
                exporter.sweep(tick);
            }
        }));
        tracing::info!(oxid = %self.exporter.oxid(), "server runtime started");
    }

    /// Stop the sweeper. Exported objects stay registered.
    pub fn shutdown(&self) {
        if let Some(handle) = self.sweeper.lock().unwrap().take() {
            handle.abort();
        }
        tracing::info!(oxid = %self.exporter.oxid(), "server runtime stopped");
    }

    pub fn is_running(&self) -> bool {
        self.sweeper.lock().unwrap().is_some()
    }
}

impl Drop for OrbServer {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.lock().unwrap().take() {
            handle.abort();
        }
    }
}
