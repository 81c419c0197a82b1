//! OpenAI-compatible chat completion proxy in front of the Gemini command-line tool.

pub mod audit;
pub mod cli;
pub mod completion;
pub mod config;
pub mod executor;
pub mod prompt;
pub mod router;
pub mod sanitize;
pub mod stream;
pub mod telemetry;
pub mod tokens;
