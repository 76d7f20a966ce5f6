use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pw_core::{Config, DesiredState, PolicyStatus};
use pw_ebt::{EbtBackend, EbtHandler, MockEbtables, ShellEbtables, diff_rulesets, render_listing};
use pw_ips::{IpsHandler, IpsetBackend, MockIpset, ShellIpset, diff_setbases, render_restore, render_save};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pwarden")]
#[command(version, about = "Bridge rule-table and address-set policy reconciler", long_about = None)]
struct Cli {
    /// Handler configuration (YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Run against in-memory backends and print the commands that would run
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bridge rule tables (ebtables)
    Ebt {
        #[command(subcommand)]
        action: EbtAction,
    },
    /// Address sets (ipset)
    Ips {
        #[command(subcommand)]
        action: IpsAction,
    },
    /// Summarize live tables and sets
    Status {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum EbtAction {
    /// Print the live rule tables
    Show,
    /// Re-read live rule tables and report what was parsed
    Resync,
    /// Show what applying a desired state would change
    Diff {
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Replace the live rule tables with a desired state
    Apply {
        #[arg(short, long)]
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum IpsAction {
    /// Print the live address sets
    Show,
    /// Re-read live address sets and report what was parsed
    Resync,
    /// Show what applying a desired state would change
    Diff {
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Push the desired address sets
    Apply {
        #[arg(short, long)]
        file: PathBuf,
        /// Destroy sets that end up with no references
        #[arg(long)]
        delete: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    match cli.command {
        Commands::Ebt { action } => {
            if cli.dry_run {
                let mut handler = EbtHandler::new(config.handler.clone(), MockEbtables::new());
                handle_ebt_action(&mut handler, &config, action)?;
                print_recorded("ebtables", handler.backend().calls());
            } else {
                let backend = ShellEbtables::new(config.ebtables.program.clone());
                let mut handler = EbtHandler::new(config.handler.clone(), backend);
                handle_ebt_action(&mut handler, &config, action)?;
            }
        }
        Commands::Ips { action } => {
            if cli.dry_run {
                let mut handler = IpsHandler::new(config.handler.clone(), config.ipset.clone(), MockIpset::new());
                handle_ips_action(&mut handler, &config, action)?;
                print_recorded("ipset", handler.backend().calls());
            } else {
                let backend = ShellIpset::new(config.ipset.program.clone());
                let mut handler = IpsHandler::new(config.handler.clone(), config.ipset.clone(), backend);
                handle_ips_action(&mut handler, &config, action)?;
            }
        }
        Commands::Status { json } => {
            let status = if cli.dry_run {
                collect_status(
                    EbtHandler::new(config.handler.clone(), MockEbtables::new()),
                    IpsHandler::new(config.handler.clone(), config.ipset.clone(), MockIpset::new()),
                    &config,
                )?
            } else {
                collect_status(
                    EbtHandler::new(config.handler.clone(), ShellEbtables::new(config.ebtables.program.clone())),
                    IpsHandler::new(
                        config.handler.clone(),
                        config.ipset.clone(),
                        ShellIpset::new(config.ipset.program.clone()),
                    ),
                    &config,
                )?
            };

            if json {
                println!("{}", status.to_json()?);
            } else {
                status.display();
            }
        }
    }

    Ok(())
}

fn handle_ebt_action<B: EbtBackend>(handler: &mut EbtHandler<B>, config: &Config, action: EbtAction) -> Result<()> {
    handler
        .init(config.cmd_prefix.as_str())
        .context("Failed to initialize ebtables handler")?;

    match action {
        EbtAction::Show => {
            handler.repopulate().context("Failed to read live ebtables state")?;
            print!("{}", render_listing(handler.rules()));
        }
        EbtAction::Resync => {
            let summary = handler.repopulate().context("Failed to read live ebtables state")?;
            handler.log_state()?;
            println!(
                "🔄 Re-read {} tables: {} entries accepted, {} lines dropped",
                handler.rules().tables().len(),
                summary.accepted,
                summary.dropped
            );
        }
        EbtAction::Diff { file } => {
            let desired = DesiredState::from_file(&file)?;
            handler.repopulate().context("Failed to read live ebtables state")?;
            let live = handler.rules().clone();

            handler.reset()?;
            load_tables(handler, &desired)?;
            match diff_rulesets(&live, handler.rules()) {
                Some(diff) => print!("{}", diff),
                None => println!("✅ Rule tables match {}", file.display()),
            }
        }
        EbtAction::Apply { file } => {
            let desired = DesiredState::from_file(&file)?;
            handler.reset()?;
            load_tables(handler, &desired)?;

            println!("⚡ Deploying rule tables from {}", file.display());
            let report = handler.deploy().context("Failed to deploy ebtables rules")?;
            for table in &report.skipped_tables {
                println!("   ⚠️  Skipped table '{}' (no ebtables namespace)", table);
            }
            if report.staging_failures > 0 {
                println!("   ⚠️  {} staging commands failed", report.staging_failures);
            }
            println!("✅ Deployed {} ebtables commands", report.staged);
        }
    }

    handler.close()?;
    Ok(())
}

fn handle_ips_action<B: IpsetBackend>(handler: &mut IpsHandler<B>, config: &Config, action: IpsAction) -> Result<()> {
    handler
        .init(config.cmd_prefix.as_str())
        .context("Failed to initialize ipset handler")?;

    match action {
        IpsAction::Show => {
            handler.repopulate().context("Failed to read live ipset state")?;
            print!("{}", render_save(handler.sets(), &config.ipset));
        }
        IpsAction::Resync => {
            let summary = handler.repopulate().context("Failed to read live ipset state")?;
            handler.log_state()?;
            println!(
                "🔄 Re-read {} sets: {} entries accepted, {} lines dropped",
                handler.sets().sets().len(),
                summary.accepted,
                summary.dropped
            );
        }
        IpsAction::Diff { file } => {
            let desired = DesiredState::from_file(&file)?;
            handler.repopulate().context("Failed to read live ipset state")?;
            let live = handler.sets().clone();

            handler.reset()?;
            load_sets(handler, &desired)?;
            match diff_setbases(&live, handler.sets(), &config.ipset) {
                Some(diff) => print!("{}", diff),
                None => println!("✅ Address sets match {}", file.display()),
            }
        }
        IpsAction::Apply { file, delete } => {
            let desired = DesiredState::from_file(&file)?;
            if delete {
                // Start from live state with every set emptied, so sets the
                // desired state no longer fills end up unreferenced.
                handler.repopulate().context("Failed to read live ipset state")?;
                let live: Vec<String> = handler
                    .sets()
                    .sets()
                    .iter()
                    .map(|set| set.name().to_string())
                    .collect();
                for name in &live {
                    handler.flush_set(name)?;
                }
            } else {
                handler.reset()?;
            }
            load_sets(handler, &desired)?;

            println!("⚡ Deploying address sets from {}", file.display());
            tracing::debug!(script = %render_restore(handler.sets(), &config.ipset, delete), "ipset restore script");
            handler.deploy(delete).context("Failed to deploy ipset sets")?;
            println!("✅ Deployed {} address sets", handler.sets().sets().len());
        }
    }

    handler.close()?;
    Ok(())
}

fn collect_status<E: EbtBackend, I: IpsetBackend>(
    mut ebt: EbtHandler<E>,
    mut ips: IpsHandler<I>,
    config: &Config,
) -> Result<PolicyStatus> {
    let mut status = PolicyStatus::new();

    ebt.init(config.cmd_prefix.as_str())
        .context("Failed to initialize ebtables handler")?;
    ebt.repopulate().context("Failed to read live ebtables state")?;
    ebt.update_refcounts()?;
    status.tables = ebt.status();
    ebt.close()?;

    ips.init(config.cmd_prefix.as_str())
        .context("Failed to initialize ipset handler")?;
    ips.repopulate().context("Failed to read live ipset state")?;
    status.sets = ips.status();
    ips.close()?;

    Ok(status)
}

/// Feeds the desired rule tables into the handler's model.
fn load_tables<B: EbtBackend>(handler: &mut EbtHandler<B>, desired: &DesiredState) -> Result<()> {
    for table in &desired.tables {
        handler.add_table(&table.name)?;
        for chain in &table.chains {
            handler
                .add_chain(&table.name, &chain.name, &chain.policy, "")
                .with_context(|| format!("Failed to add chain {}/{}", table.name, chain.name))?;
            for rule in &chain.rules {
                handler.add_rule(&table.name, &chain.name, rule)?;
            }
        }
    }
    Ok(())
}

/// Feeds the desired address sets into the handler's model.
fn load_sets<B: IpsetBackend>(handler: &mut IpsHandler<B>, desired: &DesiredState) -> Result<()> {
    for set in &desired.sets {
        handler.add_set(&set.name)?;
        for network in &set.networks {
            let added = match network.split_once('/') {
                Some((address, prefix)) => {
                    let prefix: u8 = prefix
                        .parse()
                        .with_context(|| format!("Invalid prefix length in {}", network))?;
                    handler.add_network(&set.name, address, prefix)
                }
                None => handler.add_address(&set.name, network),
            };
            added.with_context(|| format!("Failed to add {} to set {}", network, set.name))?;
        }
    }
    Ok(())
}

fn print_recorded(program: &str, calls: &[String]) {
    println!("\n🧪 Dry run: {} commands that would have run:", program);
    for call in calls {
        println!("  {} {}", program, call);
    }
}
