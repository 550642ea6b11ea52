//! Lays out a small lab: two machines, each with its own uplink network, installed as models
//! below a shared root that carries the lab configuration.
//!
//! Run with `RUST_LOG=keel_di=debug` to watch construction and teardown.

use std::sync::Arc;

use futures::{future::BoxFuture, FutureExt};
use keel_config::{Config, ConfigProvider};
use keel_di::{
    AsyncReady, Close, Component, DependencyGraph, Dependencies, DynError, Key, Provider,
    ReadyContext, Runtime, RuntimeOptions, Target, TypeInfo,
};
use keel_model::Model;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Clone)]
struct LabConfig {
    domain: String,
}

struct Network {
    name: String,
}

impl AsyncReady for Network {
    fn async_ready(&self, _cx: ReadyContext) -> BoxFuture<'_, Result<(), DynError>> {
        async move {
            tracing::info!(network = %self.name, "network up");
            Ok(())
        }
        .boxed()
    }
}

impl Close for Network {
    fn close(&self) -> Result<(), DynError> {
        tracing::info!(network = %self.name, "network down");
        Ok(())
    }
}

impl Component for Network {
    fn ready_hook(&self) -> Option<&dyn AsyncReady> {
        Some(self)
    }

    fn release_hook(&self) -> Option<&dyn Close> {
        Some(self)
    }
}

struct Machine {
    fqdn: String,
    uplink: Arc<Network>,
}

impl Close for Machine {
    fn close(&self) -> Result<(), DynError> {
        tracing::info!(machine = %self.fqdn, "powered off");
        Ok(())
    }
}

impl Component for Machine {
    fn release_hook(&self) -> Option<&dyn Close> {
        Some(self)
    }
}

fn uplink() -> Key {
    Key::of::<Network>().with("role", "outside")
}

fn machine_model(host: &'static str) -> Model {
    let network = Provider::component_function(uplink(), Dependencies::new(), move |_| async move {
        Ok::<_, DynError>(Network {
            name: format!("{host}-uplink"),
        })
    });

    let machine = Provider::component_function(
        Key::of::<Machine>(),
        Dependencies::new()
            .add::<Config<LabConfig>>("config")
            .add_key::<Arc<Network>>("uplink", uplink()),
        move |args| async move {
            let config = args.get::<Config<LabConfig>>("config")?;
            Ok::<_, DynError>(Machine {
                fqdn: format!("{host}.{}", config.domain),
                uplink: args.get::<Arc<Network>>("uplink")?,
            })
        },
    );

    Model::new(host)
        .provides(Key::named("machine").with("host", host))
        .add(network)
        .add(machine)
        .propagate(Key::of::<Machine>())
}

async fn run(runtime: &Runtime) -> Result<(), Box<dyn std::error::Error>> {
    let root = runtime.root();

    let mut configs = ConfigProvider::new();
    configs.add_config(LabConfig {
        domain: "lab.example".to_string(),
    })?;
    configs.install(root)?;

    for host in ["web", "db"] {
        machine_model(host).install(root)?;
    }

    DependencyGraph::for_scope(root).check()?;

    let machines = root
        .filter_instantiate(&Target::Type(TypeInfo::of::<Machine>()), &["host"], None)
        .await?;
    for found in &machines {
        let machine = found.instance.get::<Machine>()?;
        println!("{} via {}", machine.fqdn, machine.uplink.name);
    }

    Ok(())
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let runtime = Runtime::new(RuntimeOptions::default().with_name("lab"));
    let outcome = futures::executor::block_on(run(&runtime));

    if let Err(error) = runtime.shutdown() {
        tracing::error!(%error, "teardown failed");
    }
    if let Err(error) = outcome {
        eprintln!("layout failed: {error}");
        std::process::exit(1);
    }
}
