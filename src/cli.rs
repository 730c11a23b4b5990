//! CLI domain: parse, route, output and presentation.
//! Route handlers stay thin and dispatch into the pipeline modules.

mod output;
mod parse;
mod presentation;
mod route;

pub use output::map_error;
pub use parse::{Cli, Commands};
pub use presentation::{format_prompt_check, format_run_summary, RunSummary};
pub use route::RunContext;
