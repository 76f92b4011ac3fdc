// Nightly clippy (0.1.64) considers Drop a side effect, see https://github.com/rust-lang/rust-clippy/issues/9608
#![allow(clippy::unnecessary_lazy_evaluations)]

pub mod memory_overhead;
pub mod vmi_metrics;
pub mod vmi_types;
pub mod volume_tracker;

use anyhow::Result;
use axum::{routing::get, Router};
use futures::StreamExt;
use kube::{
    api::{Api, ListParams},
    runtime::controller::{Action, Controller},
    Client, CustomResourceExt,
};
use kube_client;
use kube_core;
use prometheus::{Registry, TextEncoder};
use std::{env, net::SocketAddr, sync::Arc};
use thiserror::Error;
use tokio::time::Duration;
use tracing::*;

use crate::memory_overhead::launcher_memory_overhead_bytes;
use crate::vmi_metrics::VmiMetrics;
use crate::vmi_types::{VirtualMachine, VirtualMachineInstance};
use crate::volume_tracker::VolumeTracker;

#[derive(Debug, Error)]
enum Error {
    #[error("Failed to get VMI: {0}")]
    VmiGetFailed(#[source] kube::Error),
    #[error("Failed to get owning VirtualMachine: {0}")]
    VmGetFailed(#[source] kube::Error),
    #[error("MissingObjectKey: {0}")]
    MissingObjectKey(&'static str),
}

// Data we want access to in error/reconcile calls
struct Data {
    client: Client,
    metrics: Arc<VmiMetrics>,
    tracker: Arc<VolumeTracker>,
}

/// Controller triggers this whenever a VMI changed
async fn reconcile(
    vmi_from_cache: Arc<VirtualMachineInstance>,
    ctx: Arc<Data>,
) -> Result<Action, Error> {
    let client = &ctx.client;

    let vmi_name = vmi_from_cache
        .metadata
        .name
        .as_ref()
        .ok_or_else(|| Error::MissingObjectKey(".metadata.name"))?;
    let vmi_ns = vmi_from_cache
        .metadata
        .namespace
        .as_ref()
        .ok_or_else(|| Error::MissingObjectKey(".metadata.namespace"))?;

    let vmi_api = Api::<VirtualMachineInstance>::namespaced(client.clone(), vmi_ns);

    // Get the VMI before taking any reconciliation actions.
    let get_result = vmi_api.get(vmi_name).await;
    match get_result {
        Err(kube_client::error::Error::Api(kube_core::ErrorResponse { reason, .. }))
            if &reason == "NotFound" =>
        {
            info!("{} not found, end reconcile", vmi_name);
            return Ok(Action::await_change());
        }
        Err(e) => return Err(Error::VmiGetFailed(e)),
        _ => {}
    }
    let vmi = get_result.unwrap();

    // A VirtualMachine owns the VMI of the same name; a freestanding VMI
    // has none, which the tracker treats as a quiet skip.
    let vm_api = Api::<VirtualMachine>::namespaced(client.clone(), vmi_ns);
    let vm = vm_api.get_opt(vmi_name).await.map_err(Error::VmGetFailed)?;

    ctx.tracker.observe(Some(&vmi), vm.as_ref());
    ctx.metrics.set_launcher_memory_overhead(
        vmi_ns,
        vmi_name,
        launcher_memory_overhead_bytes(&vmi),
    );

    Ok(Action::requeue(Duration::from_secs(60)))
}

/// The controller triggers this on reconcile errors
fn error_policy(_object: Arc<VirtualMachineInstance>, error: &Error, _ctx: Arc<Data>) -> Action {
    warn!("Reconcile failed due to error: {}", error);
    Action::requeue(Duration::from_secs(10))
}

async fn serve_metrics(registry: Registry) -> Result<()> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let registry = registry.clone();
            async move {
                let encoder = TextEncoder::new();
                let mut buffer = String::new();
                if let Err(e) = encoder.encode_utf8(&registry.gather(), &mut buffer) {
                    warn!("Failed to encode metrics: {}", e);
                }
                buffer
            }
        }),
    );
    let addr: SocketAddr = "0.0.0.0:8080".parse()?;
    info!("serving metrics on {}/metrics", addr);
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let cmd = args[1].clone();
    if cmd == String::from("export") {
        info!("exporting custom resource definitions");
        println!("{}", serde_yaml::to_string(&VirtualMachine::crd())?);
        println!("{}", serde_yaml::to_string(&VirtualMachineInstance::crd())?);
    } else if cmd == String::from("run") {
        info!("running vmi-metrics-controller");

        let registry = Registry::new();
        let metrics = Arc::new(VmiMetrics::register(&registry)?);
        let tracker = metrics.tracker();
        tokio::spawn(async move {
            if let Err(e) = serve_metrics(registry).await {
                error!("metrics server failed: {}", e);
            }
        });

        let client = Client::try_default().await?;
        let vmis = Api::<VirtualMachineInstance>::all(client.clone());

        Controller::new(vmis, ListParams::default())
            .shutdown_on_signal()
            .run(
                reconcile,
                error_policy,
                Arc::new(Data {
                    client,
                    metrics,
                    tracker,
                }),
            )
            .for_each(|res| async move {
                match res {
                    Ok(o) => info!("reconciled {:?}", o),
                    Err(e) => warn!("reconcile failed: {}", e),
                }
            })
            .await;
        info!("controller terminated");
    } else {
        warn!("wrong command; please use \"export\" or \"run\"");
    }
    Ok(())
}
