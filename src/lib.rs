pub mod config;
pub mod cost;
pub mod datasets;
pub mod error;
pub mod graph;
pub mod ops;
pub mod train;
pub mod utils;

pub use config::Config;
pub use cost::{CostFunction, CostGradient, CrossEntropy, SquaredError, TargetGradient};
pub use error::{Error, ErrorKind, OperatorError, Pass, Result, StructuralError};
pub use graph::{Commit, Graph, GraphBuilder, NodeId, Staging, Status};
