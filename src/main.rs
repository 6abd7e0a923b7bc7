use std::sync::Arc;

use anyhow::{Context, Result};
use lazynet_lib::datasets::InMemory;
use lazynet_lib::graph::GraphBuilder;
use lazynet_lib::ops::{Activation, Neurons};
use lazynet_lib::train::{spawn, TrainParams, TrainRecv, Trainer};
use lazynet_lib::{Config, SquaredError};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut params = TrainParams::default();
    if let Some(path) = std::env::args().nth(1) {
        let s = std::fs::read_to_string(&path).with_context(|| format!("failed to read {path}"))?;
        params.load_config(&s)?;
    }
    info!("training parameters\n{}", params.config()?);

    // 2 inputs -> 1 hidden node -> 1 output fed by the inputs and the hidden node
    let graph = GraphBuilder::new()
        .add_input("input", 2)
        .add_layer("hidden", 1, Neurons::new(Activation::Logistic), &["input"])
        .add_layer("out", 1, Neurons::new(Activation::Logistic), &["input", "hidden"])
        .set_outputs(&["out"])
        .build()?;
    let graph = Arc::new(graph);

    let trainer = Trainer::new(graph.clone(), SquaredError, params)?;
    let mut process = spawn(trainer, Box::new(InMemory::xor()));

    let mut last = None;
    for msg in process.iter() {
        match msg {
            TrainRecv::Progress(p) => last = Some(p),
            TrainRecv::Failed(e) => error!("training failed: {e}"),
            TrainRecv::Finished => break,
        }
    }
    let trainer = process.join()?;

    if let Some(p) = last {
        info!(epoch = p.epoch, avg_cost = p.avg_cost, percent_correct = p.percent_correct, "last epoch");
    }
    let test = trainer.test(&mut InMemory::xor(), 0)?;
    info!(avg_cost = test.avg_cost, percent_correct = test.percent_correct, "xor");
    for sample in InMemory::xor().samples() {
        let out = graph.get_outputs(&sample.inputs)?;
        info!("{:?} -> {:.4} (target {})", sample.inputs, out[0], sample.targets[0]);
    }
    Ok(())
}
