//! Command-line tool that explains code with a chat-completion backend.
//!
//! The explanation is streamed to stdout and updated in place as it arrives.
//!
//! # Usage
//!
//! ```bash
//! # Explain a file with the local llama backend
//! codeassist-explain snippet.py
//!
//! # Explain code piped on stdin with the hosted gpt backend
//! cat snippet.py | codeassist-explain --backend gpt
//!
//! # Use a different local model and disable in-place rewriting
//! codeassist-explain --model qwen2.5-coder --no-color snippet.rs
//! ```

use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arrrg::CommandLine;

use codeassist::logging::init_logging;
use codeassist::{
    Error, ExplainArgs, ExplainConfig, HttpTransport, StreamingExplainer, TerminalDisplay,
    check_api_key, load_api_key, load_env_file,
};

/// Read the code to explain from `files`, or from stdin when there are none.
///
/// Multiple files are joined with a blank line, in the order given.
fn read_code(files: &[String]) -> Result<String, Error> {
    if files.is_empty() {
        let mut code = String::new();
        std::io::stdin()
            .read_to_string(&mut code)
            .map_err(|e| Error::io("Failed to read code from stdin", e))?;
        return Ok(code);
    }
    let mut sources = Vec::with_capacity(files.len());
    for file_path in files {
        let source = std::fs::read_to_string(file_path)
            .map_err(|e| Error::io(format!("Failed to read {file_path}"), e))?;
        sources.push(source);
    }
    Ok(sources.join("\n\n"))
}

/// Main entry point for the codeassist-explain tool.
///
/// Exits with status 2 for an unknown backend, 130 when interrupted with Ctrl+C, and 1 for
/// any other failure.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (args, files) =
        ExplainArgs::from_command_line_relaxed("codeassist-explain [OPTIONS] [FILES]...");
    init_logging(args.verbose);

    let config = match ExplainConfig::try_from(args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(2);
        }
    };

    let code = read_code(&files)?;
    if code.trim().is_empty() {
        eprintln!("Error: no code to explain; pass files or pipe code on stdin");
        std::process::exit(1);
    }

    // Flag for interrupt handling during streaming
    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_clone = interrupted.clone();
    ctrlc::set_handler(move || {
        interrupted_clone.store(true, Ordering::Relaxed);
    })?;

    let mut display = TerminalDisplay::with_color(config.use_color).with_interrupt(interrupted);

    load_env_file(None);
    let api_key = load_api_key();
    if config.backend.requires_credential() {
        // Advisory only: the request is attempted either way.
        let check = check_api_key(api_key.as_deref());
        display.print_info(&check.to_string());
    }

    let explainer = StreamingExplainer::new(HttpTransport::new())
        .with_api_key(api_key)
        .with_model(config.model.clone())
        .with_base_url(config.base_url.clone())
        .with_idle_timeout(config.timeout);

    match explainer.explain(&code, config.backend, &mut display).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_abort() => {
            display.print_interrupted();
            std::process::exit(130);
        }
        Err(e) => {
            display.print_error(&e.to_string());
            std::process::exit(1);
        }
    }
}
