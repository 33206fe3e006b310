//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the Kubernetes
//! client, the reconcile workers and the Service watcher together.

use crate::config::Cli;
use crate::error::ControllerError;
use crate::events::{QUEUE_CAPACITY, WorkQueue, run_worker};
use crate::reconciler::ReconcileEngine;
use crate::watcher::EventDispatcher;
use futures::future::select_all;
use k8s_openapi::api::core::v1::Service;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
use resource_gateway::KubeGateway;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Main controller for Service synchronization.
pub struct Controller {
    dispatcher: JoinHandle<Result<(), ControllerError>>,
    workers: Vec<JoinHandle<Result<(), ControllerError>>>,
}

impl Controller {
    /// Creates a new controller instance and starts its tasks.
    pub async fn new(cli: &Cli) -> Result<Self, ControllerError> {
        info!("Initializing Service Controller");

        let config = Arc::new(cli.operator_config()?);
        let client = kube_client(cli).await?;

        let gateway = Arc::new(KubeGateway::new(client.clone()));
        let engine = Arc::new(ReconcileEngine::new(gateway, config));

        let (queue, receivers) = WorkQueue::new(cli.workers, QUEUE_CAPACITY);
        info!("Starting {} reconcile workers", queue.workers());
        let workers = receivers
            .into_iter()
            .enumerate()
            .map(|(id, rx)| tokio::spawn(run_worker(id, engine.clone(), rx)))
            .collect();

        let api: Api<Service> = match cli.watch_namespace.as_deref() {
            Some(ns) => Api::namespaced(client, ns),
            None => Api::all(client),
        };
        let dispatcher_instance = EventDispatcher::new(api, queue, cli.resync_interval());
        let dispatcher = tokio::spawn(dispatcher_instance.run());

        Ok(Self { dispatcher, workers })
    }

    /// Runs the controller until shutdown.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Service Controller running");

        // Neither the watcher nor any worker is expected to exit
        tokio::select! {
            result = &mut self.dispatcher => {
                result.map_err(|e| ControllerError::Watch(format!("Service watcher panicked: {}", e)))??;
                Err(ControllerError::Watch("Service watcher exited".to_string()))
            }
            (result, index, _) = select_all(self.workers.iter_mut()) => {
                result.map_err(|e| ControllerError::Queue(format!("Worker {} panicked: {}", index, e)))??;
                Err(ControllerError::Queue(format!("Worker {} exited", index)))
            }
        }
    }
}

async fn kube_client(cli: &Cli) -> Result<Client, ControllerError> {
    let Some(path) = cli.kubeconfig.as_ref() else {
        return Ok(Client::try_default().await?);
    };
    info!("Loading kubeconfig from {}", path.display());
    let kubeconfig = Kubeconfig::read_from(path)
        .map_err(|e| ControllerError::InvalidConfig(format!("Failed to read kubeconfig: {}", e)))?;
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| ControllerError::InvalidConfig(format!("Failed to load kubeconfig: {}", e)))?;
    Ok(Client::try_from(config)?)
}
