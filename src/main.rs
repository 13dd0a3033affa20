use std::time::Instant;

use clap::{Parser, Subcommand};
use serde::Serialize;

use hush::config::Config;
use hush::governance::{decide_at, FlushTarget, GovernanceController, HealthMonitor, SystemState};
use hush::{hlog, Result};

/// hush - latency circuit breaker and coalescing buffer for agent messages
#[derive(Parser, Debug)]
#[command(name = "hush")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    HUSH_DEBUG=1     Enable debug logging (alternative to --debug)")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.hush/hush.log)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Override the latency threshold in milliseconds
    #[arg(long, global = true)]
    pub threshold: Option<f64>,

    /// Keep the queue in memory instead of the durable store
    #[arg(long, global = true)]
    pub ephemeral: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Write the current configuration to ~/.hush/hush.toml
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Show governance status and queue depth
    Status,

    /// List pending thoughts for an agent in queue order
    Pending {
        /// Agent ID
        #[arg(default_value = "main")]
        agent: String,
    },

    /// Buffer a message for an agent
    Buffer {
        /// Agent ID
        agent: String,
        /// Message content
        content: String,
        /// Channel the message was headed for
        #[arg(long, default_value = "cli")]
        channel: String,
        /// Recipient on that channel
        #[arg(long, default_value = "")]
        target: String,
        /// Priority: P0 (critical), P1 (normal), P2 (low)
        #[arg(long, short = 'p')]
        priority: Option<String>,
    },

    /// Synthesize and consume pending thoughts
    Flush {
        /// Agent ID, or "all"
        #[arg(default_value = "all")]
        target: String,
    },

    /// Discard pending thoughts without synthesis
    Purge {
        /// Agent ID (all agents if omitted)
        agent: Option<String>,
    },

    /// Show the synthesis audit log
    History {
        /// Agent ID (all agents if omitted)
        agent: Option<String>,
        /// Show at most this many of the newest entries
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Delete synthesized and discarded thoughts older than N days
    Prune {
        #[arg(long, default_value_t = 7)]
        days: i64,
    },

    /// Dry-run a buffering decision against injected latency samples
    Decide {
        /// Latency sample in ms (repeatable)
        #[arg(long = "sample")]
        samples: Vec<f64>,
        /// Simulated latency in ms
        #[arg(long)]
        simulate: Option<f64>,
        /// Force buffering
        #[arg(long)]
        force: bool,
        /// Engage the kill switch
        #[arg(long)]
        halt: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    hush::log::init_with_debug(cli.debug);

    let mut config = Config::load()?;
    if let Some(threshold) = cli.threshold {
        config.threshold_ms = threshold;
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cli, config))
}

async fn run(cli: Cli, config: Config) -> Result<()> {
    let controller = GovernanceController::from_config(&config, cli.ephemeral).await?;
    if !controller.store().is_available() {
        eprintln!(
            "Warning: thought store unavailable ({}); buffering disabled",
            controller.store().unavailable_reason().unwrap_or("unknown")
        );
    }
    let json = cli.json;

    match cli.command {
        Command::Init { force } => {
            let path = Config::config_path()?;
            if path.exists() && !force {
                println!("{} already exists (use --force to overwrite)", path.display());
                return Ok(());
            }
            config.save()?;
            println!("wrote {}", path.display());
        }

        Command::Status => {
            let status = controller.status().await;
            if json {
                return print_json(&status);
            }
            println!("Mode:       {}", status.mode);
            println!("Buffering:  {} ({})", status.buffering, status.reason);
            println!("Halted:     {}", status.halted);
            println!("Threshold:  {}ms", status.threshold);
            println!("Pending:    {}", status.pending);
            if !status.agents.is_empty() {
                println!("Agents:     {}", status.agents.join(", "));
            }
            println!("Store:      {}", controller.store().describe());
        }

        Command::Pending { agent } => {
            let pending = controller.store().pending(&agent).await;
            if json {
                return print_json(&pending);
            }
            if pending.is_empty() {
                println!("no pending thoughts");
            }
            for thought in pending {
                println!(
                    "#{:<5} {} {} [{}] {}",
                    thought.id,
                    thought.priority,
                    thought.created_at.format("%Y-%m-%d %H:%M:%S"),
                    thought.channel,
                    thought.content
                );
            }
        }

        Command::Buffer {
            agent,
            content,
            channel,
            target,
            priority,
        } => {
            let outcome = controller
                .buffer_attempt(&agent, &channel, &target, &content, priority.as_deref())
                .await;
            hlog!("CLI buffer agent={} -> {}", agent, outcome);
            if json {
                return print_json(&outcome);
            }
            println!("{}", outcome);
        }

        Command::Flush { target } => {
            let outcome = controller.flush(FlushTarget::from(target.as_str())).await;
            if json {
                return print_json(&outcome);
            }
            println!("{}", outcome);
        }

        Command::Purge { agent } => {
            let outcome = controller.purge(agent.as_deref()).await;
            if json {
                return print_json(&outcome);
            }
            println!("{}", outcome);
        }

        Command::History { agent, limit } => {
            let history = controller.store().synthesis_history(agent.as_deref()).await;
            let skip = history.len().saturating_sub(limit);
            let recent = &history[skip..];
            if json {
                return print_json(&recent);
            }
            if recent.is_empty() {
                println!("no syntheses recorded");
            }
            for event in recent {
                println!(
                    "{} {} ({} thoughts)",
                    event.triggered_at.format("%Y-%m-%d %H:%M:%S"),
                    event.agent_id,
                    event.thought_count
                );
            }
        }

        Command::Prune { days } => {
            let cutoff = chrono::Utc::now() - chrono::Duration::days(days.max(0));
            let removed = controller.store().prune_settled(cutoff).await?;
            println!("pruned {} settled thought(s)", removed);
        }

        Command::Decide {
            samples,
            simulate,
            force,
            halt,
        } => {
            // Scratch monitor and state; the live controller is not touched.
            let gov = controller.config();
            let monitor = HealthMonitor::new(gov.window_capacity);
            for sample in samples {
                monitor.record(sample);
            }
            let state = SystemState::default()
                .with_simulated_latency(simulate.unwrap_or(0.0))
                .with_forced_buffering(force)
                .with_halted(halt);
            let decision = decide_at(
                &monitor,
                gov.threshold_ms,
                &state,
                gov.health_window,
                Instant::now(),
            );
            if json {
                return print_json(&decision);
            }
            println!(
                "buffering={} reason=\"{}\" latency={}ms",
                decision.buffering, decision.reason, decision.latency_ms
            );
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
