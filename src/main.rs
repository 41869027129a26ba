use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{error, info};

use portwatch::cli::{self, Args, Command};
use portwatch::config::ConfigManager;
use portwatch::gate::{Admission, AdmissionGate};
use portwatch::logging;
use portwatch::queue::Dispatcher;
use portwatch::runner::ScanRunner;
use portwatch::scanner::NmapScanner;
use portwatch::scheduler::Scheduler;
use portwatch::store::{Device, ScanRecord, ScanStatus, ScanStore};

fn main() {
    if let Err(e) = run() {
        error!("application error: {}", e);
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = cli::parse_args();
    cli::validate_args(&args)?;

    let config = match &args.config_file {
        Some(path) => ConfigManager::load_from_file(path.clone())?,
        None => ConfigManager::load()?,
    };
    logging::init_logger(cli::configure_logging(&args, &config)?)?;

    let db_path = args
        .database
        .clone()
        .unwrap_or_else(|| config.database_path());
    let store = ScanStore::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;

    // One current_thread runtime for the whole application
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(execute(args, config, store))
}

async fn execute(args: Args, config: ConfigManager, store: ScanStore) -> Result<()> {
    match args.command {
        Command::Add {
            mac,
            ip,
            name,
            offline,
        } => {
            let device = store.upsert_device(&mac, &ip, name.as_deref(), !offline)?;
            println!(
                "registered {} at {} ({})",
                device.mac,
                device.ip,
                if device.online { "online" } else { "offline" }
            );
            Ok(())
        }
        Command::Devices => {
            let devices = store.list_devices()?;
            if devices.is_empty() {
                println!("no devices registered");
            }
            for device in devices {
                print_device(&device);
            }
            Ok(())
        }
        Command::Online { mac, offline } => {
            store.set_device_online(&mac, !offline)?;
            println!(
                "{} marked {}",
                mac,
                if offline { "offline" } else { "online" }
            );
            Ok(())
        }
        Command::Scan { mac, first_time } => run_single_scan(&config, store, &mac, first_time).await,
        Command::History { mac, limit } => {
            let records = store.history(&mac, limit)?;
            if records.is_empty() {
                println!("no scan history for {}", mac);
            }
            for record in records {
                print_record(&record);
            }
            Ok(())
        }
        Command::Results { mac, record } => show_results(&store, &mac, record),
        Command::Watch => run_watch(&config, store).await,
    }
}

/// Build the scan pipeline: runner over the store, dispatcher over the
/// runner, gate in front of the dispatcher.
fn build_pipeline(
    config: &ConfigManager,
    store: &ScanStore,
) -> Result<(Arc<Dispatcher>, AdmissionGate)> {
    let settings = config.scanner_settings()?;
    let timeout = settings.timeout;
    let scanner = Arc::new(NmapScanner::new(settings));
    let runner = Arc::new(ScanRunner::new(store.clone(), scanner, timeout));
    let dispatcher = Arc::new(Dispatcher::start(runner, config.dispatcher_config()?)?);
    let gate = AdmissionGate::new(store.clone(), dispatcher.clone());
    Ok((dispatcher, gate))
}

async fn run_single_scan(
    config: &ConfigManager,
    store: ScanStore,
    mac: &str,
    first_time: bool,
) -> Result<()> {
    let (dispatcher, gate) = build_pipeline(config, &store)?;

    let admission = if first_time {
        gate.admit_new_device(mac)?
    } else {
        gate.admit_rescan(mac)?
    };
    println!("{}", admission);

    if let Admission::Admitted { record_id } = admission {
        dispatcher.idle().await;
        if let Some(record) = store.get_record(record_id)? {
            print_record(&record);
            if record.status == ScanStatus::Completed {
                for finding in store.results_for(record.id)? {
                    println!(
                        "  {}/{} {} {}",
                        finding.port,
                        finding.protocol,
                        finding.state,
                        finding.service_description()
                    );
                }
            }
        }
    }
    dispatcher.shutdown().await;
    Ok(())
}

fn show_results(store: &ScanStore, mac: &str, record_id: Option<i64>) -> Result<()> {
    let record = match record_id {
        Some(id) => store.get_record(id)?,
        None => store
            .history(mac, None)?
            .into_iter()
            .find(|r| r.status == ScanStatus::Completed),
    };
    let record = match record {
        Some(record) => record,
        None => {
            println!("no completed scan for {}", mac);
            return Ok(());
        }
    };
    print_record(&record);
    for finding in store.results_for(record.id)? {
        println!(
            "  {}/{} {} {}",
            finding.port,
            finding.protocol,
            finding.state,
            finding.service_description()
        );
    }
    Ok(())
}

async fn run_watch(config: &ConfigManager, store: ScanStore) -> Result<()> {
    let (dispatcher, gate) = build_pipeline(config, &store)?;
    let interval = config.rescan_interval()?;
    let scheduler = Scheduler::start(store.clone(), Arc::new(gate), interval);

    println!(
        "watching {} online devices, rescanning every {}s (Ctrl-C to stop)",
        store.online_devices()?.len(),
        interval.as_secs()
    );
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    info!("shutdown requested, draining in-flight scans");
    scheduler.stop().await;
    dispatcher.idle().await;
    dispatcher.shutdown().await;
    Ok(())
}

fn print_device(device: &Device) {
    println!(
        "{}  {:<15}  {:<7}  first seen {}  {}",
        device.mac,
        device.ip,
        if device.online { "online" } else { "offline" },
        device.first_seen.format("%Y-%m-%d %H:%M:%S"),
        device.name.as_deref().unwrap_or("-")
    );
}

fn print_record(record: &ScanRecord) {
    let completed = record
        .completed_at
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string());
    print!(
        "#{}  {}  {:<11}  started {}  finished {}",
        record.id,
        record.target_ip,
        record.status,
        record.started_at.format("%Y-%m-%d %H:%M:%S"),
        completed
    );
    match &record.error_message {
        Some(message) => println!("  ({})", message),
        None => println!(),
    }
}
