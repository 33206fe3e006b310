//! Kubernetes Service watcher.
//!
//! This module watches `v1/Service` objects, turns the raw watch events
//! into add/update/delete lifecycle events and feeds them to the workers.

use crate::error::ControllerError;
use crate::events::{LifecycleEvent, WorkQueue};
use futures::TryStreamExt;
use k8s_openapi::api::core::v1::Service;
use kube::Api;
use kube_runtime::watcher;
use resource_gateway::ServiceRecord;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::{Instant, Interval, interval_at};
use tracing::{debug, info, warn};

/// Last seen state of every watched Service, keyed by `namespace/name`
#[derive(Debug, Default)]
pub struct ServiceCache {
    records: HashMap<String, ServiceRecord>,
    /// Keys seen since the last `Init`, while a relist is in progress
    relisted: Option<HashSet<String>>,
}

impl ServiceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[cfg(test)]
    pub fn get(&self, key: &str) -> Option<&ServiceRecord> {
        self.records.get(key)
    }

    /// Translate one watch event, updating the cache.
    pub fn apply(&mut self, event: watcher::Event<Service>) -> Vec<LifecycleEvent> {
        match event {
            watcher::Event::Apply(svc) => to_record(&svc).map(|r| self.upsert(r)).into_iter().collect(),
            watcher::Event::InitApply(svc) => {
                let Some(record) = to_record(&svc) else {
                    return Vec::new();
                };
                if let Some(seen) = self.relisted.as_mut() {
                    seen.insert(record.key());
                }
                vec![self.upsert(record)]
            }
            watcher::Event::Delete(svc) => match to_record(&svc) {
                Some(record) => {
                    self.records.remove(&record.key());
                    vec![LifecycleEvent::Deleted(record)]
                }
                None => Vec::new(),
            },
            watcher::Event::Init => {
                debug!("Service relist started");
                self.relisted = Some(HashSet::new());
                Vec::new()
            }
            watcher::Event::InitDone => {
                let Some(seen) = self.relisted.take() else {
                    return Vec::new();
                };
                // Services removed while the watch was down
                let gone: Vec<String> = self
                    .records
                    .keys()
                    .filter(|k| !seen.contains(*k))
                    .cloned()
                    .collect();
                gone.into_iter()
                    .filter_map(|k| self.records.remove(&k))
                    .map(LifecycleEvent::Deleted)
                    .collect()
            }
        }
    }

    /// An `Updated { old = cached, new = cached }` for every cached Service
    pub fn resync(&self) -> Vec<LifecycleEvent> {
        self.records
            .values()
            .map(|r| LifecycleEvent::Updated { old: r.clone(), new: r.clone() })
            .collect()
    }

    fn upsert(&mut self, record: ServiceRecord) -> LifecycleEvent {
        match self.records.insert(record.key(), record.clone()) {
            Some(old) => LifecycleEvent::Updated { old, new: record },
            None => LifecycleEvent::Added(record),
        }
    }
}

fn to_record(svc: &Service) -> Option<ServiceRecord> {
    match ServiceRecord::try_from(svc) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!("Ignoring Service event: {}", e);
            None
        }
    }
}

/// Watches Services and dispatches lifecycle events to the work queue.
pub struct EventDispatcher {
    api: Api<Service>,
    queue: WorkQueue,
    resync: Option<Duration>,
    cache: ServiceCache,
}

impl EventDispatcher {
    /// Creates a new dispatcher instance.
    pub fn new(api: Api<Service>, queue: WorkQueue, resync: Option<Duration>) -> Self {
        Self {
            api,
            queue,
            resync,
            cache: ServiceCache::new(),
        }
    }

    /// Watch until the stream fails or the workers go away.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Starting Service watcher");

        let mut stream = Box::pin(watcher(self.api.clone(), watcher::Config::default()));
        let mut ticker = self.resync.map(|period| interval_at(Instant::now() + period, period));

        loop {
            tokio::select! {
                next = stream.try_next() => {
                    let event = next
                        .map_err(|e| ControllerError::Watch(format!("Watcher stream error: {}", e)))?
                        .ok_or_else(|| ControllerError::Watch("Watcher stream ended".to_string()))?;
                    for event in self.cache.apply(event) {
                        self.queue.enqueue(event).await?;
                    }
                }
                _ = tick(&mut ticker) => {
                    debug!("Resyncing {} Services", self.cache.len());
                    for event in self.cache.resync() {
                        self.queue.enqueue(event).await?;
                    }
                }
            }
        }
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
