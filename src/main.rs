use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use colored::*;
use deimos::external::Traceroute;
use deimos::intelligence::OsFingerprinter;
use deimos::monitor::RenderFrame;
use deimos::network::dns::DnsLookup;
use deimos::network::icmp::{Pinger, SystemPinger};
use deimos::network::interfaces::{list_interfaces, AddressReport};
use deimos::top_ports::parse_port_spec;
use deimos::{
    EngineConfig, HostDiscovery, LatencyMonitor, PortScanner, ProbeStrategy, Resolution, TargetResolver,
    ThroughputProber,
};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

mod output;

fn cli() -> Command {
    let target = || {
        Arg::new("target")
            .value_name("TARGET")
            .help("Target (IP, hostname or CIDR)")
            .required(true)
            .index(1)
    };

    Command::new("deimos")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Network reconnaissance and diagnostics: sweeps, port probes, fingerprints, latency and throughput")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("PATH")
                .value_parser(value_parser!(PathBuf))
                .global(true)
                .help("Configuration file (defaults to ~/.deimos.toml when present)"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .global(true)
                .help("Print the final report as JSON"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .global(true)
                .help("Debug logging and every port state"),
        )
        .subcommand(
            Command::new("sweep")
                .about("Ping sweep a subnet and list live hosts")
                .arg(target().value_name("CIDR")),
        )
        .subcommand(
            Command::new("scan")
                .about("Probe the ports of one target")
                .arg(target())
                .arg(
                    Arg::new("ports")
                        .short('p')
                        .long("ports")
                        .value_name("SPEC")
                        .default_value("common")
                        .help("Ports: 'common', a range like 1-1024, a list like 22,80,443, or a mix"),
                )
                .arg(
                    Arg::new("strategy")
                        .short('s')
                        .long("strategy")
                        .value_name("STRATEGY")
                        .default_value("auto")
                        .value_parser(["auto", "connect", "syn", "external"])
                        .help("Probe strategy"),
                )
                .arg(
                    Arg::new("banners")
                        .long("banners")
                        .action(ArgAction::SetTrue)
                        .help("Capture banners for open ports missing from the service table"),
                ),
        )
        .subcommand(
            Command::new("os")
                .about("Guess the operating system family of a target")
                .arg(target())
                .arg(
                    Arg::new("port")
                        .short('p')
                        .long("port")
                        .value_name("PORT")
                        .value_parser(value_parser!(u16).range(1..))
                        .help("Known open port to probe"),
                ),
        )
        .subcommand(
            Command::new("monitor")
                .about("Live latency graph with rolling statistics")
                .arg(target())
                .arg(
                    Arg::new("count")
                        .short('n')
                        .long("count")
                        .value_name("N")
                        .value_parser(value_parser!(u64))
                        .default_value("0")
                        .help("Samples to take (0 runs until interrupted)"),
                )
                .arg(
                    Arg::new("interval")
                        .short('i')
                        .long("interval")
                        .value_name("SECONDS")
                        .value_parser(value_parser!(f64))
                        .help("Seconds between probes"),
                ),
        )
        .subcommand(
            Command::new("ping")
                .about("Send a fixed number of echo probes")
                .arg(target())
                .arg(
                    Arg::new("count")
                        .short('n')
                        .long("count")
                        .value_name("N")
                        .value_parser(value_parser!(u64).range(1..))
                        .default_value("4")
                        .help("Echo probes to send"),
                ),
        )
        .subcommand(
            Command::new("speed")
                .about("Rough download throughput estimate")
                .arg(target())
                .arg(
                    Arg::new("port")
                        .short('p')
                        .long("port")
                        .value_name("PORT")
                        .value_parser(value_parser!(u16).range(1..))
                        .default_value("80")
                        .help("HTTP port"),
                ),
        )
        .subcommand(
            Command::new("trace")
                .about("Trace the route to a target")
                .arg(target())
                .arg(
                    Arg::new("max-hops")
                        .short('m')
                        .long("max-hops")
                        .value_name("N")
                        .value_parser(value_parser!(u8).range(1..))
                        .default_value("30")
                        .help("Maximum hops"),
                ),
        )
        .subcommand(
            Command::new("interfaces")
                .about("List local network interfaces")
                .arg(
                    Arg::new("all")
                        .short('a')
                        .long("all")
                        .action(ArgAction::SetTrue)
                        .help("Include loopback interfaces"),
                ),
        )
        .subcommand(Command::new("addresses").about("Show the primary and per-interface IP addresses"))
        .subcommand(
            Command::new("dns")
                .about("Look up A and AAAA records")
                .arg(
                    Arg::new("hostname")
                        .value_name("HOSTNAME")
                        .help("Name to look up")
                        .required(true)
                        .index(1),
                )
                .arg(
                    Arg::new("no-dig")
                        .long("no-dig")
                        .action(ArgAction::SetTrue)
                        .help("Use the system resolver only"),
                ),
        )
}

/// Everything a subcommand needs
struct Session {
    config: Arc<EngineConfig>,
    cancel: CancellationToken,
    json: bool,
    verbose: bool,
}

impl Session {
    fn pinger(&self) -> Arc<dyn Pinger> {
        Arc::new(SystemPinger::new(&self.config.ping_path))
    }

    async fn resolve(&self, target: &str) -> anyhow::Result<Resolution> {
        let resolution = TargetResolver::from_config(&self.config).resolve(target).await?;
        for notice in &resolution.notices {
            output::print_notice(notice);
        }
        Ok(resolution)
    }
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();
    let Some((name, sub)) = matches.subcommand() else {
        eprintln!("{} no subcommand given", "Error:".bright_red().bold());
        process::exit(2);
    };

    // Global flags are propagated down to the subcommand's matches.
    let verbose = sub.get_flag("verbose");
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(if verbose { "debug" } else { "warn" }))
        .init();

    if let Err(e) = run(name, sub, verbose).await {
        eprintln!("{} {:#}", "Error:".bright_red().bold(), e);
        process::exit(1);
    }
}

async fn run(name: &str, sub: &ArgMatches, verbose: bool) -> anyhow::Result<()> {
    let config = EngineConfig::discover(sub.get_one::<PathBuf>("config").map(PathBuf::as_path))?;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Interrupt received, finishing in-flight probes");
            interrupt.cancel();
        }
    });

    let session = Session {
        config: Arc::new(config),
        cancel,
        json: sub.get_flag("json"),
        verbose,
    };

    match name {
        "sweep" => sweep(&session, sub).await,
        "scan" => scan(&session, sub).await,
        "os" => os(&session, sub).await,
        "monitor" => monitor(&session, sub, false).await,
        "ping" => monitor(&session, sub, true).await,
        "speed" => speed(&session, sub).await,
        "trace" => trace(&session, sub).await,
        "interfaces" => interfaces(&session, sub),
        "addresses" => addresses(&session),
        "dns" => dns(&session, sub).await,
        other => Err(anyhow::anyhow!("unknown subcommand '{}'", other)),
    }
}

fn target_arg(sub: &ArgMatches) -> &str {
    sub.get_one::<String>("target").map(String::as_str).unwrap_or_default()
}

async fn sweep(session: &Session, sub: &ArgMatches) -> anyhow::Result<()> {
    let resolution = session.resolve(target_arg(sub)).await?;
    let discovery = HostDiscovery::new(session.config.clone(), session.pinger());

    let pb = output::progress_bar(resolution.addresses.len(), "Sweeping", session.json);
    let report = discovery
        .discover(&resolution.addresses, &session.cancel, |result| {
            pb.inc(1);
            if result.is_open() {
                pb.println(format!("  {} is up", result.address.to_string().bright_green()));
            }
        })
        .await;
    pb.finish_and_clear();

    if session.json {
        return output::emit_json(&report);
    }
    output::print_sweep(&report);
    Ok(())
}

async fn scan(session: &Session, sub: &ArgMatches) -> anyhow::Result<()> {
    let resolution = session.resolve(target_arg(sub)).await?;
    let address = resolution.primary()?;

    let spec = sub.get_one::<String>("ports").map(String::as_str).unwrap_or("common");
    let ports = parse_port_spec(spec, &session.config.common_ports)?;
    let strategy: ProbeStrategy = sub
        .get_one::<String>("strategy")
        .map(String::as_str)
        .unwrap_or("auto")
        .parse()?;

    let scanner = PortScanner::new(session.config.clone()).with_banners(sub.get_flag("banners"));

    let pb = output::progress_bar(ports.len(), "Probing", session.json);
    let report = scanner
        .probe(address, &ports, strategy, &session.cancel, |result| {
            pb.inc(1);
            if let (true, Some(port)) = (result.is_open(), result.port) {
                pb.println(format!("  {}/tcp open", port.to_string().bright_green()));
            }
        })
        .await?;
    pb.finish_and_clear();

    if session.json {
        return output::emit_json(&report);
    }
    output::print_scan(&report, session.verbose);
    Ok(())
}

async fn os(session: &Session, sub: &ArgMatches) -> anyhow::Result<()> {
    let resolution = session.resolve(target_arg(sub)).await?;
    let address = resolution.primary()?;
    let port = sub.get_one::<u16>("port").copied();

    let fingerprinter = OsFingerprinter::new(session.config.clone(), session.pinger());
    let guess = fingerprinter.fingerprint(address, port, &session.cancel).await;

    if session.json {
        return output::emit_json(&guess);
    }
    output::print_os(&guess);
    Ok(())
}

async fn monitor(session: &Session, sub: &ArgMatches, ping_style: bool) -> anyhow::Result<()> {
    let target = target_arg(sub).to_string();
    let resolution = session.resolve(&target).await?;
    let address = resolution.primary()?;

    let count = sub.get_one::<u64>("count").copied().unwrap_or(0);
    let every = match sub.try_get_one::<f64>("interval").ok().flatten() {
        Some(&secs) => Duration::try_from_secs_f64(secs)
            .map_err(|_| anyhow::anyhow!("invalid interval: {}", secs))?,
        None => session.config.monitor_interval_duration(),
    };

    let (tx, mut rx) = mpsc::channel::<RenderFrame>(session.config.frame_buffer.max(1));
    let quiet = session.json;
    let label = target.clone();
    let renderer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if quiet {
                continue;
            }
            if ping_style {
                output::print_ping_line(&frame, &label);
            } else {
                output::print_frame(&frame);
            }
        }
    });

    if !session.json {
        println!(
            "{} {} ({})",
            if ping_style { "Pinging" } else { "Monitoring" },
            target.bright_cyan(),
            address
        );
    }

    let mut monitor = LatencyMonitor::new(session.config.clone(), session.pinger());
    let report = monitor.run(address, count, every, &session.cancel, Some(tx)).await;
    // The sender is dropped with the monitor run, which ends the renderer.
    if let Err(e) = renderer.await {
        log::error!("Renderer failed: {}", e);
    }

    if session.json {
        return output::emit_json(&report);
    }
    output::print_monitor_summary(&report, !ping_style);
    Ok(())
}

async fn speed(session: &Session, sub: &ArgMatches) -> anyhow::Result<()> {
    let host = target_arg(sub);
    let resolution = session.resolve(host).await?;
    let address = resolution.primary()?;
    let port = sub.get_one::<u16>("port").copied().unwrap_or(80);

    let prober = ThroughputProber::new(session.config.clone());
    let pb = output::progress_bar(session.config.throughput_max_bytes as usize, "Downloading", session.json);
    let report = prober.measure(host, address, port, |bytes| pb.set_position(bytes)).await?;
    pb.finish_and_clear();

    if session.json {
        return output::emit_json(&report);
    }
    output::print_throughput(&report);
    Ok(())
}

async fn trace(session: &Session, sub: &ArgMatches) -> anyhow::Result<()> {
    let resolution = session.resolve(target_arg(sub)).await?;
    let address = resolution.primary()?;
    let max_hops = sub.get_one::<u8>("max-hops").copied().unwrap_or(30);

    if !session.json {
        println!("Tracing route to {} ({}), {} hops max", resolution.original.bright_cyan(), address, max_hops);
    }
    let hops = Traceroute::from_config(&session.config)
        .trace(address, max_hops, &session.cancel)
        .await?;

    if session.json {
        return output::emit_json(&hops);
    }
    output::print_trace(&hops);
    Ok(())
}

fn interfaces(session: &Session, sub: &ArgMatches) -> anyhow::Result<()> {
    let interfaces = list_interfaces(sub.get_flag("all"));
    if session.json {
        return output::emit_json(&interfaces);
    }
    output::print_interfaces(&interfaces);
    Ok(())
}

fn addresses(session: &Session) -> anyhow::Result<()> {
    let report = AddressReport::collect();
    if session.json {
        return output::emit_json(&report);
    }
    output::print_addresses(&report);
    Ok(())
}

async fn dns(session: &Session, sub: &ArgMatches) -> anyhow::Result<()> {
    let hostname = sub.get_one::<String>("hostname").map(String::as_str).unwrap_or_default();
    let mut lookup = DnsLookup::new(&session.config);
    if sub.get_flag("no-dig") {
        lookup = lookup.without_dig();
    }

    let report = lookup.lookup(hostname, &session.cancel).await?;
    if session.json {
        return output::emit_json(&report);
    }
    output::print_dns(&report);
    Ok(())
}
