//! The training driver: steps a shared [`Graph`] through forward, backward and
//! adjustment passes, either inline or on a worker thread that streams
//! progress back over a channel.

use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{Context, Error, Result};
use crossbeam::channel::{unbounded, Receiver, Sender};
use derivative::Derivative;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cost::{CostFunction, TargetGradient};
use crate::datasets::{Dataset, Sample};
use crate::graph::{Commit, Graph};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Derivative)]
#[derivative(Default)]
#[serde(default)]
pub struct TrainParams {
    #[derivative(Default(value = "1.0"))]
    pub learning_rate: f64,
    #[derivative(Default(value = "1000"))]
    pub max_epochs: usize,
    /// samples per commit; above 1 parameter changes are staged and
    /// committed once the batch fills
    #[derivative(Default(value = "1"))]
    pub batch_size: usize,
    pub shuffle: bool,
    /// epochs between log lines, 0 for none
    #[derivative(Default(value = "100"))]
    pub log_every: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StepResult {
    pub outputs: Vec<f64>,
    pub cost: f64,
    pub correct: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Progress {
    pub epoch: usize,
    pub avg_cost: f64,
    pub percent_correct: f64,
    pub is_test: bool,
}

pub struct Trainer {
    graph: Arc<Graph>,
    cost: Box<dyn CostFunction>,
    params: TrainParams,
    /// samples adjusted since the last commit
    pending: usize,
}

impl Trainer {
    pub fn new(graph: Arc<Graph>, cost: impl CostFunction + 'static, params: TrainParams) -> Result<Self> {
        if params.batch_size == 0 {
            return Err(Error::msg("batch_size must be at least 1"));
        }
        Ok(Self {
            graph,
            cost: Box::new(cost),
            params,
            pending: 0,
        })
    }

    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    pub fn params(&self) -> &TrainParams {
        &self.params
    }

    fn commit_mode(&self) -> Commit {
        if self.params.batch_size > 1 {
            Commit::Deferred
        } else {
            Commit::Immediate
        }
    }

    fn predict(&self, sample: &Sample) -> Result<Vec<f64>> {
        let outputs = self.graph.get_outputs(&sample.inputs)?;
        if outputs.len() != sample.targets.len() {
            return Err(Error::msg(format!(
                "network has {} outputs, sample has {} targets",
                outputs.len(),
                sample.targets.len()
            )));
        }
        Ok(outputs)
    }

    /// One forward, backward and adjustment pass over a single sample.
    pub fn step(&mut self, sample: &Sample) -> Result<StepResult> {
        let outputs = self.predict(sample)?;
        let cost = self.cost.cost(&outputs, &sample.targets);
        let correct = self.cost.is_correct(&outputs, &sample.targets);

        let grad = TargetGradient::new(self.cost.as_ref(), &outputs, &sample.targets);
        self.graph.backpropagate(&grad).context("backward pass failed")?;
        self.graph
            .adjust(self.params.learning_rate, self.commit_mode())
            .context("adjustment failed")?;

        if self.commit_mode() == Commit::Deferred {
            self.pending += 1;
            if self.pending >= self.params.batch_size {
                self.flush()?;
            }
        }
        Ok(StepResult { outputs, cost, correct })
    }

    /// Commits a partially filled batch.
    pub fn flush(&mut self) -> Result<()> {
        if self.pending > 0 {
            self.graph.commit_all_weights().context("commit failed")?;
            self.pending = 0;
        }
        Ok(())
    }

    /// Trains on every sample of `data` once.
    pub fn epoch(&mut self, data: &mut dyn Dataset, epoch: usize) -> Result<Progress> {
        data.reset();
        if self.params.shuffle {
            data.shuffle();
        }
        let (mut total, mut correct, mut n) = (0.0, 0, 0);
        while let Some(sample) = data.next() {
            let r = self.step(&sample).with_context(|| format!("epoch {epoch}, sample {n}"))?;
            total += r.cost;
            correct += r.correct as usize;
            n += 1;
        }
        self.flush()?;
        Ok(summarize(epoch, total, correct, n, false))
    }

    /// Scores `data` without adjusting anything.
    pub fn test(&self, data: &mut dyn Dataset, epoch: usize) -> Result<Progress> {
        data.reset();
        let (mut total, mut correct, mut n) = (0.0, 0, 0);
        while let Some(sample) = data.next() {
            let outputs = self.predict(&sample)?;
            total += self.cost.cost(&outputs, &sample.targets);
            correct += self.cost.is_correct(&outputs, &sample.targets) as usize;
            n += 1;
        }
        Ok(summarize(epoch, total, correct, n, true))
    }
}

fn summarize(epoch: usize, total: f64, correct: usize, n: usize, is_test: bool) -> Progress {
    let n = n.max(1) as f64;
    Progress {
        epoch,
        avg_cost: total / n,
        percent_correct: 100.0 * correct as f64 / n,
        is_test,
    }
}

pub enum TrainSend {
    Kill,
}

#[derive(Clone, Debug)]
pub enum TrainRecv {
    Progress(Progress),
    Failed(String),
    Finished,
}

/// Handle to a training run on its own thread. Commands go in, progress
/// comes out; joining hands the trainer back.
pub struct TrainProcess {
    send: Sender<TrainSend>,
    recv: Receiver<TrainRecv>,
    handle: Option<JoinHandle<Trainer>>,
}

impl TrainProcess {
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    pub fn send_command(&self, command: TrainSend) -> Result<()> {
        self.send
            .send(command)
            .map_err(|_| Error::msg("training process has already exited"))
    }

    pub fn try_recv(&self) -> Vec<TrainRecv> {
        self.recv.try_iter().collect()
    }

    /// Blocks for each message until the run ends.
    pub fn iter(&self) -> impl Iterator<Item = TrainRecv> + '_ {
        self.recv.iter()
    }

    pub fn try_kill(&self) -> Result<()> {
        self.send_command(TrainSend::Kill)
    }

    /// Asks the run to stop after the current epoch and waits for it.
    pub fn kill_blocking(&mut self) -> Result<Trainer> {
        // the run may have finished on its own
        let _ = self.try_kill();
        self.join()
    }

    pub fn join(&mut self) -> Result<Trainer> {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| Error::msg("training process already joined"))?;
        handle
            .join()
            .map_err(|x| Error::msg(format!("training thread panicked: {:?}", x.downcast_ref::<&str>())))
    }
}

/// Runs `trainer` over `data` for `max_epochs` epochs on a new thread.
pub fn spawn(mut trainer: Trainer, mut data: Box<dyn Dataset>) -> TrainProcess {
    let (command_sender, command_recv) = unbounded::<TrainSend>();
    let (log_sender, log_recv) = unbounded::<TrainRecv>();

    let handle = std::thread::spawn(move || {
        let TrainParams { max_epochs, log_every, .. } = trainer.params.clone();
        for epoch in 1..=max_epochs {
            if let Ok(TrainSend::Kill) = command_recv.try_recv() {
                warn!(epoch, "training killed");
                break;
            }
            let progress = match trainer.epoch(data.as_mut(), epoch) {
                Ok(p) => p,
                Err(e) => {
                    warn!(epoch, "training failed: {e:#}");
                    let _ = log_sender.send(TrainRecv::Failed(format!("{e:#}")));
                    return trainer;
                }
            };
            if log_every > 0 && epoch % log_every == 0 {
                info!(epoch, avg_cost = progress.avg_cost, percent_correct = progress.percent_correct, "epoch done");
            }
            if log_sender.send(TrainRecv::Progress(progress)).is_err() {
                debug!(epoch, "progress receiver dropped, stopping");
                return trainer;
            }
        }
        let _ = log_sender.send(TrainRecv::Finished);
        trainer
    });

    TrainProcess {
        send: command_sender,
        recv: log_recv,
        handle: Some(handle),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cost::SquaredError;
    use crate::graph::GraphBuilder;
    use crate::ops::{Activation, Neurons};

    fn single_neuron() -> Arc<Graph> {
        let g = GraphBuilder::new()
            .add_input("x", 1)
            .add_layer("y", 1, Neurons::with_weights(Activation::Identity, vec![0.0, 0.0]), &["x"])
            .set_outputs(&["y"])
            .build()
            .unwrap();
        Arc::new(g)
    }

    #[test]
    fn zero_batch_is_rejected() {
        let params = TrainParams { batch_size: 0, ..Default::default() };
        assert!(Trainer::new(single_neuron(), SquaredError, params).is_err());
    }

    #[test]
    fn step_moves_towards_target() {
        let graph = single_neuron();
        let params = TrainParams { learning_rate: 0.1, ..Default::default() };
        let mut t = Trainer::new(graph.clone(), SquaredError, params).unwrap();
        let s = Sample::new(vec![1.0], vec![1.0]);
        let first = t.step(&s).unwrap();
        assert_eq!(first.outputs, vec![0.0]);
        // w and b each gain 0.1
        let y = graph.id("y").unwrap();
        let w = graph.parameters(y).unwrap();
        assert!((w[0] - 0.1).abs() < 1e-12 && (w[1] - 0.1).abs() < 1e-12);
        assert!(t.step(&s).unwrap().cost < first.cost);
    }

    #[test]
    fn deferred_commit_waits_for_the_batch() {
        let graph = single_neuron();
        let params = TrainParams { learning_rate: 0.1, batch_size: 3, ..Default::default() };
        let mut t = Trainer::new(graph.clone(), SquaredError, params).unwrap();
        let y = graph.id("y").unwrap();
        let s = Sample::new(vec![1.0], vec![1.0]);
        t.step(&s).unwrap();
        t.step(&s).unwrap();
        assert_eq!(graph.parameters(y).unwrap(), vec![0.0, 0.0]);
        t.step(&s).unwrap();
        let w = graph.parameters(y).unwrap();
        assert!((w[0] - 0.3).abs() < 1e-12);
    }

    #[test]
    fn target_width_is_checked() {
        let mut t = Trainer::new(single_neuron(), SquaredError, TrainParams::default()).unwrap();
        assert!(t.step(&Sample::new(vec![1.0], vec![1.0, 0.0])).is_err());
    }
}
