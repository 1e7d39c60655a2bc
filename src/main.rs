use std::path::PathBuf;
use std::process::exit;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{ArgAction, Parser};
use itertools::Itertools;
use log::LevelFilter;
use strum::IntoEnumIterator;

use angry_monitor::capture::{read_cap_file, read_wired_cap_file, CaptureStats, PcapDumper};
use angry_monitor::{Bss, BssCounter, Monitor, MonitorConfig, Passphrase, StaCounter, Station};

#[derive(Parser)]
#[command(name = "AngryMonitor")]
#[command(author = "Ryan Butler (Ragnt)")]
#[command(about = "Watches 802.11 security state... and decrypts what it can.", long_about = None)]
#[command(version)]
struct Arguments {
    #[arg(short = 'r', long)]
    /// Wireless capture to replay (802.11 or radiotap pcap).
    read: Option<PathBuf>,

    #[arg(short = 'R', long)]
    /// Optional - Wired capture (Ethernet pcap) with EAPOL or RADIUS traffic.
    wired: Option<PathBuf>,

    #[arg(short = 'w', long)]
    /// Optional - Write processed and decrypted frames to this pcap.
    write: Option<PathBuf>,

    #[arg(short = 'p', long = "passphrase")]
    /// Passphrase as SSID:passphrase, or a bare passphrase for any network. Repeatable.
    passphrases: Vec<String>,

    #[arg(short = 's', long = "secret")]
    /// RADIUS shared secret. Repeatable.
    secrets: Vec<String>,

    #[arg(short = 'f', long)]
    /// Frames in the wireless capture carry a trailing FCS.
    fcs: bool,

    #[arg(short = 'd', long = "debug", action = ArgAction::Count)]
    /// More output; repeat for more.
    debug: u8,

    #[arg(short = 'q', long, conflicts_with = "debug")]
    /// Only print warnings and errors.
    quiet: bool,
}

fn init_logging(cli: &Arguments) {
    let level = match (cli.quiet, cli.debug) {
        (true, _) => LevelFilter::Warn,
        (false, 0) => LevelFilter::Info,
        (false, 1) => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp_millis()
        .init();
}

fn build_config(cli: &Arguments) -> Result<MonitorConfig> {
    let passphrases = cli
        .passphrases
        .iter()
        .map(|p| p.parse::<Passphrase>())
        .collect::<Result<Vec<_>, _>>()
        .context("invalid passphrase")?;
    Ok(MonitorConfig::default()
        .passphrases(passphrases)
        .radius_secrets(cli.secrets.clone())
        .fcs(cli.fcs))
}

fn main() -> Result<()> {
    let cli = Arguments::parse();
    init_logging(&cli);

    if cli.read.is_none() && cli.wired.is_none() {
        eprintln!("Nothing to do: give a wireless (-r) and/or wired (-R) capture.");
        exit(2);
    }

    let mut monitor = Monitor::new(build_config(&cli)?)?;
    let start = Local::now();
    println!("💲 Starting at {}", start.format("%Y-%m-%d %H:%M:%S"));

    if let Some(path) = &cli.write {
        let dumper = PcapDumper::create(path)?;
        monitor.set_sink(Box::new(dumper));
        println!("💲 Writing frames to {}", path.display());
    }

    // Wired traffic first: RADIUS exchanges there provide PMKs for the air.
    if let Some(path) = &cli.wired {
        println!("💲 Reading wired capture {}", path.display());
        let stats = read_wired_cap_file(&mut monitor, path)?;
        print_capture_stats(&stats);
    }

    if let Some(path) = &cli.read {
        println!("💲 Reading wireless capture {}", path.display());
        let stats = read_cap_file(&mut monitor, path)?;
        print_capture_stats(&stats);
    }

    // Dropping the sink flushes the output file.
    drop(monitor.take_sink());

    println!();
    print_monitor_summary(&monitor);
    println!();
    println!("Complete! Happy Monitoring! 🤙");
    Ok(())
}

fn print_capture_stats(stats: &CaptureStats) {
    println!(
        "💲 {} packets | {} decrypted | {} unreadable",
        stats.packets, stats.decrypted, stats.errors
    );
}

fn format_counters<C: IntoEnumIterator + std::fmt::Display + Copy>(
    get: impl Fn(C) -> u32,
) -> String {
    C::iter()
        .filter(|&c| get(c) > 0)
        .map(|c| format!("{}={}", c, get(c)))
        .join(", ")
}

fn format_station(sta: &Station) -> String {
    let counters = format_counters::<StaCounter>(|c| sta.counter(c));
    format!(
        "    {} | {} | PTK: {} | {}",
        sta.addr(),
        sta.state(),
        if sta.ptk_set() { "yes" } else { "no" },
        if counters.is_empty() { "-".to_string() } else { counters }
    )
}

fn format_bss(bss: &Bss) -> String {
    let gtks = (0u8..4)
        .filter(|&i| bss.gtk.get(i).is_some())
        .map(|i| i.to_string())
        .join(",");
    format!(
        "[{}] {} | ch {} | stations: {} | GTK: {} | {}",
        bss.ssid_str(),
        bss.bssid(),
        bss.channel.map_or("?".to_string(), |c| c.to_string()),
        bss.station_count(),
        if gtks.is_empty() { "-".to_string() } else { gtks },
        format_counters::<BssCounter>(|c| bss.counter(c))
    )
}

fn print_monitor_summary(monitor: &Monitor) {
    let counters = monitor.counters();
    println!(
        "😈 Frames: mgmt {} | ctrl {} | data {} | wired {} | bad FCS {} | malformed {}",
        counters.rx_mgmt,
        counters.rx_ctrl,
        counters.rx_data,
        counters.rx_wired,
        counters.fcs_error,
        counters.malformed
    );

    let networks: Vec<&Bss> = monitor.bss_iter().sorted_by_key(|b| b.bssid()).collect();
    if networks.is_empty() {
        println!("AngryMonitor did not see any networks. 😔 Check the capture?");
        return;
    }
    for bss in networks {
        println!("{}", format_bss(bss));
        for sta in bss.stations().sorted_by_key(|s| s.addr()) {
            println!("{}", format_station(sta));
        }
    }
}
