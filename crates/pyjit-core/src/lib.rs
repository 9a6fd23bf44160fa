//! PyJIT Core - staging, execution pipeline and reporting
//!
//! Shared by the HTTP server and anything else that needs to run a script
//! against a fetched data source.

pub mod config;
pub mod fetch;
pub mod outcome;
pub mod report;
pub mod service;
pub mod stager;

pub use config::{ServiceConfig, StagingConfig};
pub use fetch::{Fetch, HttpFetcher};
pub use outcome::ExecutionOutcome;
pub use report::{report, ResponseBody, ResponseEnvelope, FETCH_FAILED_MESSAGE, SUCCESS_MESSAGE};
pub use service::{ExecutionRequest, ExecutionService};
pub use stager::{FetchError, ResourceStager, StagedResource};
