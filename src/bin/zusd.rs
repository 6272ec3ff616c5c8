//! ZUSD Stability Pool CLI
//!
//! Operates a stability pool persisted in a local data directory.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;

use zusd::cli::{parse_rate, CliConfig, OutputFormat, OutputFormatter, Workspace};
use zusd::core::config::{PoolConfig, WithdrawalPolicy};
use zusd::core::token::{CollateralAmount, TokenAmount, ZeroTokenAmount};
use zusd::pool::DepositorOutcome;
use zusd::simulation::{Simulation, SimulationConfig};
use zusd::utils::crypto::AccountId;

/// ZUSD Stability Pool CLI - liquidation absorption with O(1) reward accounting
#[derive(Parser)]
#[command(name = "zusd")]
#[command(author = "ZUSD Team")]
#[command(version = zusd::VERSION)]
#[command(about = "Command-line interface for the ZUSD stability pool", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to data directory
    #[arg(short, long, env = "ZUSD_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Output format (text, json, json-pretty)
    #[arg(short, long, env = "ZUSD_OUTPUT")]
    format: Option<OutputFormat>,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty pool in the data directory
    Init {
        /// Account allowed to offset debt (hex or label)
        #[arg(long)]
        liquidation_manager: Option<AccountId>,

        /// Over-withdrawal policy (clamp or reject)
        #[arg(long)]
        withdrawal_policy: Option<WithdrawalPolicy>,

        /// Scale increments a single offset may apply
        #[arg(long)]
        max_scale_crossings: Option<u32>,

        /// Force overwrite an existing pool
        #[arg(long)]
        force: bool,
    },

    /// Deposit ZUSD into the pool
    Deposit {
        /// Depositor (hex or label)
        account: AccountId,

        /// Amount in ZUSD
        amount: String,

        /// Front end to tag a fresh deposit with
        #[arg(long)]
        front_end: Option<AccountId>,
    },

    /// Withdraw ZUSD and pay out accrued gains
    Withdraw {
        /// Depositor (hex or label)
        account: AccountId,

        /// Amount in ZUSD, or `all`
        amount: String,
    },

    /// Pay out accrued gains without touching the deposit
    Claim {
        /// Depositor (hex or label)
        account: AccountId,
    },

    /// Cancel liquidated debt against the pool
    Offset {
        /// Debt in ZUSD
        debt: String,

        /// Collateral received, in RBTC
        collateral: String,

        /// Calling account; defaults to the configured liquidation manager
        #[arg(long)]
        caller: Option<AccountId>,
    },

    /// Register a front end
    RegisterFrontEnd {
        /// Front end account (hex or label)
        account: AccountId,

        /// Share of ZERO rewards passed to depositors, e.g. 0.8
        kickback_rate: String,
    },

    /// Show a depositor's position
    Depositor {
        /// Depositor (hex or label)
        account: AccountId,
    },

    /// Show a front end's stake and rewards
    FrontEnd {
        /// Front end account (hex or label)
        account: AccountId,
    },

    /// Pool status
    Status,

    /// Compare pooled totals with the sum over depositors
    Audit {
        /// Largest accepted gap in base units
        #[arg(long)]
        tolerance: Option<u128>,
    },

    /// Show stored events
    Events {
        /// Show only the most recent events
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Run a randomized simulation against an in-memory pool
    Simulate {
        /// RNG seed
        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Random operations before the final drain
        #[arg(long, default_value_t = 1_000)]
        steps: usize,

        /// Number of depositors
        #[arg(long, default_value_t = 20)]
        depositors: usize,
    },
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run_command(&cli) {
        eprintln!("{} {:#}", style("Error:").red().bold(), e);
        std::process::exit(1);
    }
}

fn cli_config(cli: &Cli) -> CliConfig {
    let mut config = CliConfig::from_env();
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    // settings saved by `init`; flags and environment still win
    if let Ok(saved) = CliConfig::load(&config.settings_path()) {
        config.format = saved.format;
        config.color &= saved.color;
        config.audit_tolerance = saved.audit_tolerance;
    }
    if let Some(format) = cli.format {
        config.format = format;
    }
    if cli.no_color {
        config.color = false;
    }
    config
}

fn formatter(config: &CliConfig) -> OutputFormatter {
    let output = OutputFormatter::new(config.format);
    if config.color {
        output
    } else {
        output.without_color()
    }
}

fn run_command(cli: &Cli) -> anyhow::Result<()> {
    let config = cli_config(cli);
    let output = formatter(&config);

    match &cli.command {
        Commands::Init {
            liquidation_manager,
            withdrawal_policy,
            max_scale_crossings,
            force,
        } => cmd_init(
            &config,
            &output,
            *liquidation_manager,
            *withdrawal_policy,
            *max_scale_crossings,
            *force,
        ),
        Commands::Deposit {
            account,
            amount,
            front_end,
        } => cmd_deposit(&config, &output, *account, amount, *front_end),
        Commands::Withdraw { account, amount } => cmd_withdraw(&config, &output, *account, amount),
        Commands::Claim { account } => cmd_claim(&config, &output, *account),
        Commands::Offset {
            debt,
            collateral,
            caller,
        } => cmd_offset(&config, &output, debt, collateral, *caller),
        Commands::RegisterFrontEnd {
            account,
            kickback_rate,
        } => cmd_register_front_end(&config, &output, *account, kickback_rate),
        Commands::Depositor { account } => cmd_depositor(&config, &output, *account),
        Commands::FrontEnd { account } => cmd_front_end(&config, &output, *account),
        Commands::Status => cmd_status(&config, &output),
        Commands::Audit { tolerance } => cmd_audit(&config, &output, *tolerance),
        Commands::Events { limit } => cmd_events(&config, &output, *limit),
        Commands::Simulate {
            seed,
            steps,
            depositors,
        } => cmd_simulate(&output, *seed, *steps, *depositors),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMMAND HANDLERS
// ═══════════════════════════════════════════════════════════════════════════════

fn cmd_init(
    config: &CliConfig,
    output: &OutputFormatter,
    liquidation_manager: Option<AccountId>,
    withdrawal_policy: Option<WithdrawalPolicy>,
    max_scale_crossings: Option<u32>,
    force: bool,
) -> anyhow::Result<()> {
    output.info(&format!("Initializing pool in {}", config.data_dir.display()));

    let mut pool_config = PoolConfig::from_env()?;
    if let Some(manager) = liquidation_manager {
        pool_config.liquidation_manager = manager;
    }
    if let Some(policy) = withdrawal_policy {
        pool_config.withdrawal_policy = policy;
    }
    if let Some(crossings) = max_scale_crossings {
        pool_config.params.max_scale_crossings = crossings;
    }

    let workspace = Workspace::init(config, pool_config, force)
        .with_context(|| format!("cannot initialize {}", config.data_dir.display()))?;
    config
        .save(&config.settings_path())
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    output.success("Stability pool initialized");
    output.data(
        "Configuration",
        &json!({
            "data_dir": config.data_dir.display().to_string(),
            "liquidation_manager": workspace.liquidation_manager().to_hex(),
            "withdrawal_policy": workspace.service().config().withdrawal_policy,
            "max_scale_crossings": workspace.service().config().params.max_scale_crossings,
        }),
    );
    Ok(())
}

fn cmd_deposit(
    config: &CliConfig,
    output: &OutputFormatter,
    account: AccountId,
    amount: &str,
    front_end: Option<AccountId>,
) -> anyhow::Result<()> {
    let amount = TokenAmount::parse(amount)?;
    let workspace = Workspace::open(config)?;

    workspace.fund(&account, amount)?;
    let outcome = workspace.service().deposit(account, amount, front_end)?;
    workspace.commit()?;

    output.success(&format!("Deposited {} for {}", amount, account));
    print_outcome(output, &outcome);
    Ok(())
}

fn cmd_withdraw(
    config: &CliConfig,
    output: &OutputFormatter,
    account: AccountId,
    amount: &str,
) -> anyhow::Result<()> {
    let amount = if amount.eq_ignore_ascii_case("all") {
        TokenAmount::from_raw(u128::MAX)
    } else {
        TokenAmount::parse(amount)?
    };
    let workspace = Workspace::open(config)?;

    let outcome = workspace.service().withdraw(account, amount)?;
    workspace.commit()?;

    output.success(&format!("Withdrew {} for {}", outcome.withdrawn, account));
    print_outcome(output, &outcome);
    Ok(())
}

fn cmd_claim(config: &CliConfig, output: &OutputFormatter, account: AccountId) -> anyhow::Result<()> {
    let workspace = Workspace::open(config)?;

    let outcome = workspace.service().claim_gains(account)?;
    workspace.commit()?;

    output.success(&format!("Paid gains to {}", account));
    print_outcome(output, &outcome);
    Ok(())
}

fn cmd_offset(
    config: &CliConfig,
    output: &OutputFormatter,
    debt: &str,
    collateral: &str,
    caller: Option<AccountId>,
) -> anyhow::Result<()> {
    let debt = TokenAmount::parse(debt)?;
    let collateral = CollateralAmount::parse(collateral)?;
    let workspace = Workspace::open(config)?;
    let caller = caller.unwrap_or_else(|| workspace.liquidation_manager());

    let outcome = workspace.service().offset(&caller, debt, collateral)?;
    workspace.commit()?;

    if outcome.applied {
        output.success(&format!("Offset {} against {}", outcome.debt, outcome.collateral));
    } else {
        output.warning("Offset skipped: pool empty or zero debt");
    }
    output.data(
        "Offset",
        &json!({
            "applied": outcome.applied,
            "loss_per_unit": outcome.loss_per_unit.to_string(),
            "p": outcome.p.to_string(),
            "epoch": outcome.epoch,
            "scale": outcome.scale,
            "scale_crossings": outcome.scale_crossings,
            "epoch_advanced": outcome.epoch_advanced,
        }),
    );
    Ok(())
}

fn cmd_register_front_end(
    config: &CliConfig,
    output: &OutputFormatter,
    account: AccountId,
    kickback_rate: &str,
) -> anyhow::Result<()> {
    let rate = parse_rate(kickback_rate)?;
    let workspace = Workspace::open(config)?;

    workspace.service().register_front_end(account, rate)?;
    workspace.commit()?;

    output.success(&format!("Registered front end {} with kickback rate {}", account, rate));
    Ok(())
}

fn cmd_depositor(config: &CliConfig, output: &OutputFormatter, account: AccountId) -> anyhow::Result<()> {
    let workspace = Workspace::open(config)?;
    let settlement = workspace.service().settle(&account)?;

    output.data(
        "Depositor",
        &json!({
            "account": account.to_hex(),
            "initial_deposit": settlement.initial.to_string(),
            "compounded_deposit": settlement.compounded.to_string(),
            "collateral_gain": settlement.collateral_gain.to_string(),
            "zero_gain": settlement.zero_gain.to_string(),
            "front_end": settlement.front_end.map(|f| f.to_hex()),
        }),
    );
    Ok(())
}

fn cmd_front_end(config: &CliConfig, output: &OutputFormatter, account: AccountId) -> anyhow::Result<()> {
    let workspace = Workspace::open(config)?;
    let service = workspace.service();
    let front_end = service
        .front_end(&account)?
        .ok_or_else(|| anyhow::anyhow!("front end {} is not registered", account))?;

    output.data(
        "Front End",
        &json!({
            "account": account.to_hex(),
            "kickback_rate": front_end.kickback_rate.to_string(),
            "compounded_stake": service.compounded_front_end_stake(&account)?.to_string(),
            "zero_gain": service.front_end_zero_gain(&account)?.to_string(),
        }),
    );
    Ok(())
}

fn cmd_status(config: &CliConfig, output: &OutputFormatter) -> anyhow::Result<()> {
    let workspace = Workspace::open(config)?;
    let stats = workspace.service().stats()?;

    output.data(
        "Stability Pool Status",
        &json!({
            "version": zusd::VERSION,
            "state_hash": workspace.service().state_hash()?.to_hex(),
            "total_pooled": stats.total_pooled.to_string(),
            "total_collateral": stats.total_collateral.to_string(),
            "depositors": stats.depositor_count,
            "front_ends": stats.front_end_count,
            "p": stats.p.to_string(),
            "epoch": stats.epoch,
            "scale": stats.scale,
            "lifetime": {
                "offsets": stats.stats.offsets,
                "debt_offset": stats.stats.total_debt_offset.to_string(),
                "collateral_received": stats.stats.total_collateral_received.to_string(),
                "collateral_paid": stats.stats.total_collateral_paid.to_string(),
                "deposited": stats.stats.total_deposited.to_string(),
                "withdrawn": stats.stats.total_withdrawn.to_string(),
                "zero_distributed": stats.stats.zero_distributed.to_string(),
                "zero_undistributed": stats.stats.zero_undistributed.to_string(),
                "epoch_changes": stats.stats.epoch_changes,
                "scale_changes": stats.stats.scale_changes,
            },
        }),
    );
    Ok(())
}

fn cmd_audit(config: &CliConfig, output: &OutputFormatter, tolerance: Option<u128>) -> anyhow::Result<()> {
    let workspace = Workspace::open(config)?;
    let report = workspace.service().check_conservation()?;
    let tolerance = tolerance.unwrap_or(config.audit_tolerance);

    output.data(
        "Conservation",
        &json!({
            "total_pooled": report.total_pooled.to_string(),
            "sum_compounded": report.sum_compounded.to_string(),
            "deposit_gap": report.deposit_gap().to_string(),
            "total_collateral": report.total_collateral.to_string(),
            "sum_collateral_gains": report.sum_collateral_gains.to_string(),
            "collateral_shortfall": report.collateral_shortfall().to_string(),
            "depositors": report.depositors,
        }),
    );

    if !report.is_balanced(tolerance) {
        anyhow::bail!("pool is out of balance beyond {} base units", tolerance);
    }
    output.success("Pool balanced");
    Ok(())
}

fn cmd_events(config: &CliConfig, output: &OutputFormatter, limit: Option<usize>) -> anyhow::Result<()> {
    let workspace = Workspace::open(config)?;
    let events = workspace.events()?;
    let skip = limit.map(|n| events.len().saturating_sub(n)).unwrap_or(0);

    let rows: Vec<_> = events
        .iter()
        .skip(skip)
        .map(|record| {
            json!({
                "sequence": record.sequence,
                "timestamp": record.timestamp.to_rfc3339(),
                "type": record.event.event_type(),
                "account": record.event.account().map(|a| a.to_hex()),
            })
        })
        .collect();

    output.data("Events", &rows);
    Ok(())
}

fn cmd_simulate(output: &OutputFormatter, seed: u64, steps: usize, depositors: usize) -> anyhow::Result<()> {
    let config = SimulationConfig {
        seed,
        steps,
        depositors,
        ..Default::default()
    };
    let progress = create_progress_bar(steps as u64);
    let report = Simulation::new(config)?.run_with_progress(|_| progress.inc(1))?;
    progress.finish_and_clear();

    output.data(
        "Simulation",
        &json!({
            "seed": report.seed,
            "deposits": report.deposits,
            "withdrawals": report.withdrawals,
            "offsets": report.offsets,
            "wipe_outs": report.wipe_outs,
            "deep_offsets": report.deep_offsets,
            "final_epoch": report.final_epoch,
            "max_scale": report.max_scale,
            "max_deposit_gap": report.max_deposit_gap.to_string(),
            "gap_allowance": report.gap_allowance.to_string(),
            "gap_overruns": report.gap_overruns,
            "residual_pooled": report.residual_pooled.to_string(),
            "residual_collateral": report.residual_collateral.to_string(),
            "collateral_paid": report.collateral_paid.to_string(),
            "zero_issued": report.zero_issued.to_string(),
            "zero_paid": report.zero_paid.to_string(),
        }),
    );

    if !report.all_withdrawals_succeeded() {
        for failure in &report.failed_withdrawals {
            output.warning(failure);
        }
        anyhow::bail!("{} final withdrawals failed", report.failed_withdrawals.len());
    }
    output.success("All depositors withdrew in full");
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

fn print_outcome(output: &OutputFormatter, outcome: &DepositorOutcome) {
    let front_end_zero_gain = (outcome.front_end_zero_gain != ZeroTokenAmount::ZERO)
        .then(|| outcome.front_end_zero_gain.to_string());
    output.data(
        "Outcome",
        &json!({
            "deposit": outcome.new_deposit.to_string(),
            "stake_loss": outcome.stake_loss.to_string(),
            "collateral_gain": outcome.collateral_gain.to_string(),
            "zero_gain": outcome.zero_gain.to_string(),
            "front_end": outcome.front_end.map(|f| f.to_hex()),
            "front_end_zero_gain": front_end_zero_gain,
        }),
    );
}

fn create_progress_bar(len: u64) -> ProgressBar {
    let bar = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        bar.set_style(style.progress_chars("=> "));
    }
    bar.set_message("simulating");
    bar
}
