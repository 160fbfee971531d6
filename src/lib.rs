//! Program-aided language model harness: prompt a model, run the program it
//! writes in a sandboxed interpreter and score the answers.

pub mod answer;
pub mod bench;
pub mod config;
pub mod execution;
pub mod extract;
pub mod interface;
pub mod llm;
pub mod printer;
pub mod prompt;
pub mod telemetry;
