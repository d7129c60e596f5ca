//! Command-line interface for miner-manager.
//!
//! Deploys miners to remote machines and watches their status. Settings
//! come from `MINER_MANAGER_*` environment variables.

use std::env;
use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;

use miner_manager::ManagerConfig;
use miner_manager::deploy::{
    AutoConfirm, Confirm, Deployment, DeploymentContext, MinerConfiguration, Progress, Prompt,
    Step, WorkflowEvent,
};
use miner_manager::executor::Remote;
use miner_manager::fleet::{FleetEvent, FleetManager};
use miner_manager::miner::{MachineRegistry, MinerEntity};
use miner_manager::package::LocalPackageProvider;
use miner_manager::protocol::WorkerClient;
use miner_manager::tracing::{init_journald_or_stdout, prelude::*};
use miner_manager::types::{DeploymentStatus, MachineName};
use miner_manager::wallet::CoinConfig;

fn usage() -> ! {
    eprintln!("Usage: miner-manager <command> [args]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  probe <machine>                       Check that a machine answers");
    eprintln!("  devices <machine>                     List mining devices of a deployed miner");
    eprintln!("  deploy <machine> <wallet> <pool> [--start] [--yes]");
    eprintln!("         [--device <id>] [--version <v>] Deploy and configure a miner");
    eprintln!("  watch <machine>...                    Poll miners and print status changes");
    eprintln!();
    eprintln!("Wallets starting with 0x deploy an Ethereum miner; <pool> is then host:port.");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  MINER_MANAGER_TRANSPORT          unc (default) or ssh");
    eprintln!("  MINER_MANAGER_SSH_USER           Login for the ssh transport");
    eprintln!("  MINER_MANAGER_DEPLOY_FOLDER      Remote folder (default: c:\\xdagger)");
    eprintln!("  MINER_MANAGER_PACKAGE_ROOT       Local package directory (default: packages)");
    eprintln!("  MINER_MANAGER_POLL_INTERVAL_MS   Status poll period (default: 1000)");
    eprintln!("  MINER_MANAGER_PROBE_TIMEOUT_SECS Liveness probe timeout (default: 10)");
    eprintln!("  MINER_MANAGER_COMMAND_TIMEOUT_SECS Remote command timeout (default: 30)");
    eprintln!("  MINER_MANAGER_OUTAGE_SECS        Unanswered polls before a warning (default: 30)");
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> Result<()> {
    init_journald_or_stdout();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        usage();
    }

    let config = ManagerConfig::from_env()?;
    let rest = &args[2..];

    match args[1].as_str() {
        "probe" => cmd_probe(&config, rest).await?,
        "devices" => cmd_devices(&config, rest).await?,
        "deploy" => cmd_deploy(&config, rest).await?,
        "watch" => cmd_watch(&config, rest).await?,
        command => {
            eprintln!("Unknown command: {}", command);
            eprintln!("Run without arguments to see usage.");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn machine_arg(rest: &[String]) -> MachineName {
    match rest.first() {
        Some(machine) => MachineName::new(machine),
        None => usage(),
    }
}

async fn cmd_probe(config: &ManagerConfig, rest: &[String]) -> Result<()> {
    let machine = machine_arg(rest);
    let remote = Remote::from_config(config);

    remote
        .executor
        .probe(&machine, config.probe_timeout)
        .await?;
    println!("{machine} is reachable");

    if remote.executor.has_mining_service(&machine).await? {
        println!("{machine} already runs a miner service");
    }
    Ok(())
}

async fn cmd_devices(config: &ManagerConfig, rest: &[String]) -> Result<()> {
    let machine = machine_arg(rest);
    let remote = Remote::from_config(config);

    let devices = WorkerClient::new(remote.executor.as_ref(), &machine, &config.deployment_folder)
        .list_devices()
        .await?;

    if devices.is_empty() {
        println!("{machine}: no devices");
    }
    for device in devices {
        println!(
            "{:>4}  {}  ({}, driver {})",
            device.device_id, device.display_name, device.hardware_version, device.driver_version
        );
    }
    Ok(())
}

/// Asks on the terminal.
struct TerminalConfirm;

#[async_trait]
impl Confirm for TerminalConfirm {
    async fn confirm(&self, prompt: &Prompt) -> bool {
        print!("{prompt} [y/N] ");
        let _ = std::io::stdout().flush();

        let mut line = String::new();
        match BufReader::new(tokio::io::stdin()).read_line(&mut line).await {
            Ok(_) => matches!(line.trim(), "y" | "Y" | "yes"),
            Err(_) => false,
        }
    }
}

struct DeployArgs {
    machine: String,
    coin: CoinConfig,
    start: bool,
    assume_yes: bool,
    device: Option<String>,
    version: Option<String>,
}

fn parse_deploy_args(rest: &[String]) -> Result<DeployArgs> {
    let mut positional = Vec::new();
    let mut start = false;
    let mut assume_yes = false;
    let mut device = None;
    let mut version = None;

    let mut iter = rest.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--start" => start = true,
            "--yes" => assume_yes = true,
            "--device" => device = Some(iter.next().context("--device needs a value")?.clone()),
            "--version" => version = Some(iter.next().context("--version needs a value")?.clone()),
            flag if flag.starts_with("--") => bail!("unknown option {flag}"),
            _ => positional.push(arg.clone()),
        }
    }

    let [machine, wallet, pool] = positional.as_slice() else {
        usage();
    };

    let coin = if wallet.starts_with("0x") {
        CoinConfig::Ethereum {
            wallet: wallet.clone(),
            pool_host: pool.clone(),
            worker: machine.to_lowercase(),
        }
    } else {
        CoinConfig::XDagger {
            wallet: wallet.clone(),
            pool: pool.clone(),
        }
    };

    Ok(DeployArgs {
        machine: machine.clone(),
        coin: coin.validated()?,
        start,
        assume_yes,
        device,
        version,
    })
}

async fn cmd_deploy(config: &ManagerConfig, rest: &[String]) -> Result<()> {
    let args = parse_deploy_args(rest)?;

    let confirm: Arc<dyn Confirm> = if args.assume_yes {
        Arc::new(AutoConfirm(true))
    } else {
        Arc::new(TerminalConfirm)
    };
    let ctx = DeploymentContext::new(
        config,
        Remote::from_config(config),
        Arc::new(LocalPackageProvider::new(config.package_root.clone())),
        confirm,
        Arc::new(MachineRegistry::new()),
    );

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match event {
                WorkflowEvent::StepStarted(step) => println!("{step}..."),
                WorkflowEvent::StepFinished { step, ok: false } => println!("{step} did not complete"),
                WorkflowEvent::StepFinished { .. } => {}
                WorkflowEvent::MinerCreated(snapshot) => println!("Created {}", snapshot.name),
            }
        }
    });

    let mut deployment =
        Deployment::new(ctx, &args.machine, &config.deployment_folder).with_events(events_tx);
    deployment.set_start_after_install(args.start);
    if let Some(version) = &args.version {
        deployment.set_version(version);
    }

    let miner = loop {
        if deployment.step() == Step::Configure {
            let device_id = match &args.device {
                Some(id) => id.clone(),
                None => deployment
                    .devices()
                    .first()
                    .map(|device| device.device_id.clone())
                    .context("no devices discovered")?,
            };
            deployment.set_configuration(MinerConfiguration {
                device_id,
                coin: args.coin.clone(),
            });
        }

        match deployment.advance().await {
            Ok(Progress::Completed(_)) => continue,
            Ok(Progress::Declined(prompt)) => {
                deployment.abort();
                bail!("cancelled: {prompt}");
            }
            Ok(Progress::Finished(miner)) => break miner,
            Err(e) => {
                let step = deployment.step();
                deployment.abort();
                return Err(e).with_context(|| format!("deployment failed at {step}"));
            }
        }
    };

    // Dropping the workflow closes the event channel.
    drop(deployment);
    let _ = printer.await;

    println!(
        "{}: {} / {} in {}",
        miner.name(),
        miner.deployment_status(),
        miner.service_status(),
        miner.deployment_folder()
    );
    Ok(())
}

async fn cmd_watch(config: &ManagerConfig, rest: &[String]) -> Result<()> {
    if rest.is_empty() {
        usage();
    }

    let fleet = Arc::new(FleetManager::new(Remote::from_config(config), config));
    let mut events = BroadcastStream::new(fleet.subscribe());

    for machine in rest {
        let mut miner = MinerEntity::new(machine, &config.deployment_folder);
        miner.set_deployment_status(DeploymentStatus::Ready);
        fleet.add(miner)?;
    }

    let cancellation = CancellationToken::new();
    let poller = tokio::spawn(fleet.clone().run(config.poll_interval, cancellation.clone()));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            event = events.next() => {
                match event {
                    Some(Ok(FleetEvent::ClientStatusChanged)) => {
                        for snapshot in fleet.snapshots().await {
                            println!(
                                "{:<16} {:<14} {:>10.2} H/s",
                                snapshot.name, snapshot.service_status, snapshot.hash_rate
                            );
                        }
                        println!("{}", fleet.summary().await);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => debug!(error = %e, "Missed fleet events"),
                    None => break,
                }
            }
        }
    }

    cancellation.cancel();
    poller.await?;
    Ok(())
}
