//! Provisioning gateway for hostfleet.
//!
//! This crate provides the [`Runner`] trait and the [`AnsibleRunner`]
//! implementation used to provision bare-metal hosts, turn them into VM hosts
//! and probe their reachability. It handles:
//!
//! - Building `ansible-playbook` / `ansible` command lines for one host
//! - Enforcing an explicit deadline and caller cancellation on every run
//! - Parsing the JSON callback report into [`HostFacts`]
//!
//! A run is a single attempt. There is no retry policy; the caller decides
//! what a failure means for the host.
//!
//! # Example
//!
//! ```no_run
//! use hostfleet_provision::{AnsibleRunner, Invocation, RunTarget, Runner, RunnerConfig, Task};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let runner = AnsibleRunner::new(RunnerConfig::from_env());
//!
//! let target = RunTarget {
//!     address: "10.0.4.4".to_string(),
//!     port: 22,
//!     user: "root".to_string(),
//!     private_key: None,
//! };
//! let output = runner
//!     .run(&Invocation::new(target, Task::Playbook("provision_bare_metal_host.yml".into())))
//!     .await?;
//! println!("cores: {:?}", output.facts.cpu_cores);
//! # Ok(())
//! # }
//! ```
//!
//! # Testing
//!
//! Enable the `test-utils` feature to use [`MockRunner`], which replays
//! scripted outcomes and records every invocation.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod ansible;
pub mod config;
pub mod error;
pub mod facts;
pub mod types;

pub use ansible::{AnsibleRunner, Runner};
pub use config::RunnerConfig;
pub use error::{Result, RunnerError};
pub use facts::HostFacts;
pub use types::{
    Invocation, RunOutput, RunTarget, Task, DEFAULT_MODULE_TIMEOUT, DEFAULT_PLAYBOOK_TIMEOUT,
};

#[cfg(any(test, feature = "test-utils"))]
pub use ansible::mock::MockRunner;
