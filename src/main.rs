//! Scene Forge CLI
//!
//! Generates Manim animations from natural-language prompts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use scene_forge::{
    render_once, CorrectionLoop, FalGenerator, ForgeConfig, GenerationFailure, GenerationSuccess,
    ManimExecutor, RetryingGenerator, SessionStore, Validate, CONFIG_ENV,
};

type Forge = CorrectionLoop<RetryingGenerator<FalGenerator>, ManimExecutor>;

#[derive(Parser, Debug)]
#[command(name = "scene-forge", version, about)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate one animation from a description.
    Generate {
        /// What to animate.
        #[arg(required = true, num_args = 1..)]
        prompt: Vec<String>,

        /// Session to attach the result to.
        #[arg(long, default_value = "cli")]
        session: String,
    },
    /// Start an interactive session; each line after the first edits the
    /// previous animation.
    Chat,
    /// Render an existing program once, without the model.
    Render {
        /// Program file.
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(2);
        }
    };

    let ok = match cli.cmd {
        Command::Generate { prompt, session } => {
            cmd_generate(&config, &prompt.join(" "), &session).await
        }
        Command::Chat => cmd_chat(&config).await,
        Command::Render { file } => cmd_render(&config, &file).await,
    };

    if !ok {
        std::process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> scene_forge::Result<ForgeConfig> {
    let config = match path {
        Some(path) => ForgeConfig::load(path)?,
        None => ForgeConfig::default(),
    };

    for warning in config.validate().into_result()? {
        tracing::warn!(warning = %warning, "configuration warning");
    }

    Ok(config)
}

fn build_forge(config: &ForgeConfig) -> scene_forge::Result<Forge> {
    let generator = RetryingGenerator::new(
        FalGenerator::from_config(&config.generation)?,
        config.generation.transport_retries,
        config.generation.retry_backoff(),
    );
    let executor = ManimExecutor::new(&config.execution);
    let store = Arc::new(SessionStore::from_config(&config.store));

    Ok(CorrectionLoop::new(generator, executor, store, &config.correction))
}

async fn cmd_generate(config: &ForgeConfig, prompt: &str, session: &str) -> bool {
    let forge = match build_forge(config) {
        Ok(forge) => forge,
        Err(e) => {
            eprintln!("Setup failed: {}", e);
            return false;
        }
    };

    tracing::info!(prompt = %prompt, "starting generation");
    report(forge.handle_request(session, prompt).await)
}

async fn cmd_chat(config: &ForgeConfig) -> bool {
    let forge = match build_forge(config) {
        Ok(forge) => forge,
        Err(e) => {
            eprintln!("Setup failed: {}", e);
            return false;
        }
    };

    let session = format!("chat-{}", uuid::Uuid::new_v4().simple());
    println!("Describe a concept to animate. Further lines edit the last animation.");
    println!("Commands: :render FILE, :quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                eprintln!("Failed to read input: {}", e);
                break;
            }
        };

        let outcome = match parse_chat_line(&line) {
            None => continue,
            Some(ChatInput::Quit) => break,
            Some(ChatInput::Render(file)) if file.is_empty() => {
                eprintln!("Usage: :render FILE");
                continue;
            }
            Some(ChatInput::Render(file)) => match tokio::fs::read_to_string(file).await {
                Ok(program) => forge.render_program(&session, &program).await,
                Err(e) => {
                    eprintln!("Cannot read '{}': {}", file, e);
                    continue;
                }
            },
            Some(ChatInput::Request(utterance)) => {
                forge.handle_request(&session, utterance).await
            }
        };
        report(outcome);
    }

    forge.store().evict(&session);
    true
}

async fn cmd_render(config: &ForgeConfig, file: &Path) -> bool {
    let program = match tokio::fs::read_to_string(file).await {
        Ok(program) => program,
        Err(e) => {
            eprintln!("Cannot read '{}': {}", file.display(), e);
            return false;
        }
    };

    let executor = ManimExecutor::new(&config.execution);
    let store = SessionStore::from_config(&config.store);

    report(render_once(&executor, &store, "render", &program).await)
}

/// One line of chat input.
#[derive(Debug, PartialEq, Eq)]
enum ChatInput<'a> {
    Quit,
    Render(&'a str),
    Request(&'a str),
}

/// Parses a chat line. Blank lines yield `None`.
fn parse_chat_line(line: &str) -> Option<ChatInput<'_>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let (command, rest) = line
        .split_once(char::is_whitespace)
        .map_or((line, ""), |(command, rest)| (command, rest.trim()));

    Some(match command {
        ":quit" if rest.is_empty() => ChatInput::Quit,
        ":render" => ChatInput::Render(rest),
        _ => ChatInput::Request(line),
    })
}

/// Prints the outcome of a request. Returns true on success.
fn report(outcome: Result<GenerationSuccess, GenerationFailure>) -> bool {
    match outcome {
        Ok(success) => {
            println!("\n{}", "=".repeat(60));
            println!("Scene rendered after {} attempt(s)", success.attempts);
            println!("{}", "=".repeat(60));
            println!();
            println!("{}", success.program);
            println!();
            println!("Artifact: {}", success.artifact.display());
            true
        }
        Err(failure) => {
            println!("\n{}", "=".repeat(60));
            println!("Generation failed");
            println!("{}", "=".repeat(60));
            if let Some(program) = failure.last_program() {
                println!();
                println!("Closest program:");
                println!("{}", program);
            }
            eprintln!();
            eprintln!("{}", failure);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands() {
        assert_eq!(parse_chat_line("   "), None);
        assert_eq!(parse_chat_line(":quit"), Some(ChatInput::Quit));
        assert_eq!(
            parse_chat_line(":render  scene.py "),
            Some(ChatInput::Render("scene.py"))
        );
        assert_eq!(parse_chat_line(":render"), Some(ChatInput::Render("")));
    }

    #[test]
    fn command_prefixes_are_requests() {
        assert_eq!(
            parse_chat_line(":renderfoo.py"),
            Some(ChatInput::Request(":renderfoo.py"))
        );
        assert_eq!(
            parse_chat_line("slow it down"),
            Some(ChatInput::Request("slow it down"))
        );
    }
}
