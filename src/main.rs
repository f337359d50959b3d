use clap::Parser;
use dolphin_orchestrator::agent::{default_auth, Agent, AgentConfig};
use dolphin_orchestrator::config::{load_mcp_config, load_models_config};
use dolphin_orchestrator::spill::SpillConfig;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "dolphin")]
#[command(author, version, about = "Tool-augmented LLM orchestrator speaking MCP", long_about = None)]
struct Cli {
    /// Select a model by its `model` or `title` field; falls back to the
    /// config's default entry.
    #[arg(long)]
    model: Option<String>,

    /// Suppress tool-call traces on stderr.
    #[arg(short, long)]
    quiet: bool,

    /// Enter interactive mode: read one query per line from stdin until EOF.
    #[arg(long)]
    chat: bool,

    /// Provider/model configuration file.
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// MCP server configuration file.
    #[arg(long, default_value = "mcp_config.json")]
    mcp_config: PathBuf,

    /// Append one JSONL line per interaction ({messages, functions}) to this file.
    #[arg(long)]
    log_messages: Option<PathBuf>,

    /// Raise ambient tracing verbosity to debug.
    #[arg(long)]
    debug: bool,

    /// The user query (joined with spaces). Ignored in --chat mode.
    query: Vec<String>,
}

fn init_logging(debug: bool) {
    let level = if debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    let _ = simplelog::SimpleLogger::init(level, simplelog::Config::default());
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let models = match load_models_config(&cli.config) {
        Ok(models) => models,
        Err(err) => {
            eprintln!("Error: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let mcp = match load_mcp_config(&cli.mcp_config) {
        Ok(mcp) => mcp,
        Err(err) => {
            eprintln!("Error: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let auth = default_auth();
    let agent_config = AgentConfig {
        models,
        mcp,
        requested_model: cli.model.clone(),
        log_messages_path: cli.log_messages.clone(),
        max_rounds: 10,
        spill_config: SpillConfig::default(),
    };

    let agent = match Agent::start(agent_config, auth.as_ref()).await {
        Ok(agent) => agent,
        Err(err) => {
            eprintln!("Error: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let exit = if cli.chat {
        run_chat(&agent, cli.quiet).await
    } else {
        run_once(&agent, &cli.query, cli.quiet).await
    };

    agent.shutdown().await;
    exit
}

async fn run_once(agent: &Agent, query_words: &[String], quiet: bool) -> ExitCode {
    if query_words.is_empty() {
        eprintln!("Error: no query given (pass one as a trailing argument, or use --chat)");
        return ExitCode::FAILURE;
    }

    let query = query_words.join(" ");
    match agent.run_once(&query, quiet).await {
        Ok(answer) => {
            println!("{}", answer);
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("Error: {}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run_chat(agent: &Agent, quiet: bool) -> ExitCode {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("> ");
        if stdout.flush().is_err() {
            break;
        }

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                eprintln!("Error reading stdin: {}", err);
                return ExitCode::FAILURE;
            }
        }

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match agent.run_once(line, quiet).await {
            Ok(answer) => println!("{}", answer),
            Err(err) => eprintln!("Error: {}", err),
        }
    }

    ExitCode::SUCCESS
}
