//! Run a JPL program document: load → compile → execute each input.
//!
//! Usage: cargo run -p jpl-core --example run_program -- demos/greet.json '"world"' '[1, 2]'
//!
//! Each extra argument is one JSON input value. Set `RUST_LOG=jpl_core=debug`
//! to trace the execution.

use jpl_core::{Engine, RuntimeOptions};
use serde_json::Value;
use std::env;
use std::fs;
use std::process;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut args = env::args().skip(1);
    let path = match args.next() {
        Some(p) => p,
        None => {
            eprintln!("Usage: run_program <program.json> [input.json ...]");
            eprintln!("  e.g. run_program demos/greet.json '\"world\"'");
            process::exit(1);
        }
    };
    let src = fs::read_to_string(&path).unwrap_or_else(|e| {
        eprintln!("read {}: {}", path, e);
        process::exit(1);
    });
    let doc: Value = serde_json::from_str(&src).unwrap_or_else(|e| {
        eprintln!("parse {}: {}", path, e);
        process::exit(1);
    });
    let inputs: Vec<Value> = args
        .map(|raw| {
            serde_json::from_str(&raw).unwrap_or_else(|e| {
                eprintln!("input {}: {}", raw, e);
                process::exit(1);
            })
        })
        .collect();

    let engine = Engine::new();
    let program = engine.load(&doc).unwrap_or_else(|e| {
        eprintln!("compile {}: {}", path, e);
        process::exit(1);
    });
    let options: RuntimeOptions = doc
        .get("options")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .unwrap_or_else(|e| {
            eprintln!("options {}: {}", path, e);
            process::exit(1);
        })
        .unwrap_or_default();

    let runtime = engine.runtime(program, options);
    let inputs = if inputs.is_empty() { vec![Value::Null] } else { inputs };
    let outputs = runtime
        .execute(inputs)
        .await
        .and_then(|values| runtime.strip_values(&values))
        .unwrap_or_else(|e| {
            if let Some(at) = e.enclosure() {
                eprintln!("run {}: {} (at '{}' step {})", path, e, at.op, at.step);
            } else {
                eprintln!("run {}: {}", path, e);
            }
            process::exit(1);
        });
    for output in outputs {
        println!("{output}");
    }
}
