//! # gf-exec
//!
//! Runs model evaluations as supervised OS processes.
//!
//! Two schedulers share one contract ([`JobExecutor`]): a bounded local
//! pool, and a pull-based master/worker protocol over a rank-addressed
//! [`Transport`]. Both kill workers that exceed the configured time
//! budget, together with everything those workers spawned.

mod context;
mod distributed;
mod executor;
mod local;
mod model;
mod process;
pub mod transport;

pub use context::ExecutionContext;
pub use distributed::DistributedExecutor;
pub use executor::{build_executor, JobExecutor};
pub use local::LocalExecutor;
pub use model::{CommandModel, Model};
pub use process::{wait_with_timeout, WorkerHandle};
pub use transport::{Channel, Envelope, LocalTransport, Message, TcpTransport, Transport};
