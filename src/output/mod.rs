//! Terminal rendering for the deimos binary

use colored::*;
use deimos::external::TraceHop;
use deimos::intelligence::{Confidence, OsFingerprintGuess};
use deimos::monitor::{MonitorReport, RenderFrame, Sparkline, Trend};
use deimos::network::dns::DnsReport;
use deimos::network::interfaces::{AddressReport, NetworkInterface};
use deimos::utils::format_ms;
use deimos::{Notice, PortScanReport, ProbeResult, ProbeState, SweepReport, ThroughputReport};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io::{self, Write};
use std::time::Duration;

/// Print any report as pretty JSON
pub fn emit_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Progress bar for pool-driven operations; hidden in JSON mode
pub fn progress_bar(len: usize, label: &str, hidden: bool) -> ProgressBar {
    if hidden {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    let style = ProgressStyle::with_template("{spinner:.green} {msg} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb.set_message(label.to_string());
    pb
}

pub fn print_notice(notice: &Notice) {
    eprintln!("{} {}", "[!]".bright_yellow().bold(), notice);
}

fn state_colored(state: ProbeState) -> ColoredString {
    match state {
        ProbeState::Open => state.as_str().bright_green().bold(),
        ProbeState::Closed => state.as_str().bright_red(),
        ProbeState::Filtered => state.as_str().bright_yellow(),
        ProbeState::Unreachable | ProbeState::Timeout => state.as_str().dimmed(),
    }
}

fn latency_text(latency: Option<Duration>) -> String {
    latency.map(format_ms).unwrap_or_else(|| "-".to_string())
}

pub fn print_sweep(report: &SweepReport) {
    println!();
    println!("{}", "Live hosts".bright_blue().bold());
    for result in report.results.iter().filter(|r| r.is_open()) {
        println!("  {:<40} {}", result.address.to_string().bright_cyan(), latency_text(result.latency));
    }
    if report.reachable.is_empty() {
        println!("  {}", "none".dimmed());
    }

    println!();
    println!(
        "{} {}/{} hosts up, {:.1}% loss, {:.2}s",
        "Sweep:".bright_blue().bold(),
        report.reachable.len().to_string().bright_green().bold(),
        report.probed(),
        report.loss_rate(),
        report.elapsed.as_secs_f64()
    );
    if report.cancelled {
        println!(
            "{} {} addresses never probed",
            "Cancelled:".bright_yellow().bold(),
            report.not_started
        );
    }
}

pub fn print_scan(report: &PortScanReport, show_all: bool) {
    for notice in &report.notices {
        print_notice(notice);
    }

    println!();
    println!(
        "Probe report for {} ({} strategy)",
        report.address.to_string().bright_cyan(),
        report.strategy_used
    );

    let hidden = report.results.len() - report.count(ProbeState::Open);
    if !show_all && hidden > 0 {
        println!("Not shown: {} non-open ports", hidden.to_string().bright_yellow());
    }

    println!("{:<10} {:<12} {:<10} {}", "PORT", "STATE", "LATENCY", "SERVICE");
    for result in report.results.iter().filter(|r| show_all || r.is_open()) {
        print_port_line(result);
    }

    println!();
    println!(
        "{} {} open, {} closed, {} filtered of {} in {:.2}s",
        "Scan:".bright_blue().bold(),
        report.count(ProbeState::Open).to_string().bright_green().bold(),
        report.count(ProbeState::Closed),
        report.count(ProbeState::Filtered),
        report.submitted,
        report.elapsed.as_secs_f64()
    );
    if report.cancelled {
        println!("{} {} ports never probed", "Cancelled:".bright_yellow().bold(), report.not_started);
    }
}

fn print_port_line(result: &ProbeResult) {
    let port = result.port.map(|p| format!("{}/tcp", p)).unwrap_or_default();
    let service = result
        .service
        .as_ref()
        .map(|s| s.name.replace(['\r', '\n'], " ").trim().to_string())
        .unwrap_or_default();
    let mut line = format!(
        "{:<10} {:<12} {:<10} {}",
        port,
        state_colored(result.state),
        latency_text(result.latency),
        service
    );
    if let Some(note) = &result.note {
        line.push_str(&format!(" ({})", note.dimmed()));
    }
    println!("{}", line);
}

fn confidence_colored(confidence: Confidence) -> ColoredString {
    match confidence {
        Confidence::High => confidence.as_str().bright_green().bold(),
        Confidence::Medium => confidence.as_str().bright_yellow(),
        Confidence::Low => confidence.as_str().yellow(),
        Confidence::None => confidence.as_str().dimmed(),
    }
}

pub fn print_os(guess: &OsFingerprintGuess) {
    println!();
    println!(
        "{} {} (confidence: {})",
        "OS guess:".bright_blue().bold(),
        guess.os_family.to_string().bright_cyan().bold(),
        confidence_colored(guess.confidence)
    );
    if let Some(ttl) = guess.observed_ttl {
        println!("  observed TTL:    {}", ttl);
    }
    if let Some(window) = guess.observed_window {
        println!("  observed window: {}", window);
    }
    if guess.candidates.len() > 1 {
        let names: Vec<String> = guess.candidates.iter().map(|c| c.to_string()).collect();
        println!("  candidates:      {}", names.join(", "));
    }
    if let Some(hint) = &guess.release_hint {
        println!("  hint:            {}", hint);
    }
    println!("{}", "  Heuristic guess; do not rely on it for security decisions.".dimmed());
}

fn sparkline_colored(line: &Sparkline) -> String {
    line.text
        .chars()
        .zip(line.trends.iter())
        .map(|(c, trend)| {
            let cell = c.to_string();
            match trend {
                Trend::Lost => cell.bright_red().to_string(),
                Trend::Fast => cell.bright_green().to_string(),
                Trend::Normal => cell.white().to_string(),
                Trend::Slow => cell.bright_yellow().to_string(),
            }
        })
        .collect()
}

/// Redraw the live monitor line in place
pub fn print_frame(frame: &RenderFrame) {
    let stats = &frame.statistics;
    print!(
        "\r\x1b[2K#{:<5} {:>10}  {}  min {} avg {} max {} loss {:.1}%",
        frame.sample.sequence,
        latency_text(frame.sample.rtt),
        sparkline_colored(&frame.sparkline),
        latency_text(stats.min_rtt),
        latency_text(stats.avg_rtt),
        latency_text(stats.max_rtt),
        stats.loss_percent()
    );
    let _ = io::stdout().flush();
}

/// One line per reply, ping style
pub fn print_ping_line(frame: &RenderFrame, target: &str) {
    match frame.sample.rtt {
        Some(rtt) => println!("reply from {}: seq={} time={}", target, frame.sample.sequence, format_ms(rtt)),
        None => println!("{} seq={}", "request timed out".bright_red(), frame.sample.sequence),
    }
}

pub fn print_monitor_summary(report: &MonitorReport, live: bool) {
    if live {
        println!();
    }
    let stats = &report.statistics;
    println!();
    println!(
        "{} {} sent, {} received, {:.1}% loss ({})",
        "Summary:".bright_blue().bold(),
        report.sent(),
        report.received(),
        stats.loss_percent(),
        format!("{:?}", report.state).to_lowercase()
    );
    println!(
        "  min {}  avg {}  max {}",
        latency_text(stats.min_rtt),
        latency_text(stats.avg_rtt),
        latency_text(stats.max_rtt)
    );
    if !report.sparkline.is_empty() {
        println!("  {}", sparkline_colored(&report.sparkline));
    }
}

pub fn print_throughput(report: &ThroughputReport) {
    println!();
    println!("{}", "Throughput estimate".bright_blue().bold());
    println!("  method:        {}", report.method);
    println!("  response time: {:.2} s", report.connect_time.as_secs_f64());
    println!("  downloaded:    {:.2} MB", report.bytes as f64 / (1024.0 * 1024.0));
    println!(
        "  speed:         {:.2} MB/s ({} Mbps)",
        report.rate_bps / (1024.0 * 1024.0),
        format!("{:.2}", report.mbps).bright_green().bold()
    );
    if report.capped {
        println!("  {}", "stopped at the configured size cap".dimmed());
    }
    println!("{}", "  Rough single-stream estimate, not a calibrated bandwidth test.".dimmed());
}

pub fn print_trace(hops: &[TraceHop]) {
    println!();
    println!("{:<4} {:<40} {}", "HOP", "HOST", "AVG RTT");
    for hop in hops {
        let host = match (&hop.host, &hop.address) {
            (Some(host), Some(addr)) if host != addr => format!("{} ({})", host, addr),
            (Some(host), _) => host.clone(),
            _ => "*".to_string(),
        };
        let avg = hop
            .avg_rtt
            .map(|ms| format!("{:.2} ms", ms))
            .unwrap_or_else(|| "-".to_string());
        println!("{:<4} {:<40} {}", hop.hop, host, avg);
    }
    println!();
    println!("{} {} hops", "Trace:".bright_blue().bold(), hops.len());
}

pub fn print_interfaces(interfaces: &[NetworkInterface]) {
    println!();
    println!("{:<16} {:<8} {:<19} {}", "INTERFACE", "STATUS", "MAC", "ADDRESSES");
    for iface in interfaces {
        let status = if iface.is_up {
            iface.status().bright_green()
        } else {
            iface.status().bright_red()
        };
        let mac = iface.mac.as_deref().unwrap_or("-");
        let mut addresses = iface.addresses.iter().map(|a| format!("{}: {}", a.family(), a));
        let first = addresses.next().unwrap_or_else(|| "none".to_string());
        println!("{:<16} {:<8} {:<19} {}", iface.name.bright_cyan(), status, mac, first);
        for rest in addresses {
            println!("{:<46}{}", "", rest);
        }
    }
    println!();
    println!("{} {} found", "Interfaces:".bright_blue().bold(), interfaces.len());
}

pub fn print_addresses(report: &AddressReport) {
    println!();
    match report.primary {
        Some(ip) => println!("{} {}", "Primary IPv4:".bright_blue().bold(), ip.to_string().bright_green().bold()),
        None => println!("{} {}", "Primary IPv4:".bright_blue().bold(), "no default route".dimmed()),
    }
    for (name, addresses) in &report.interfaces {
        println!();
        println!("{}", name.bright_cyan().bold());
        for addr in addresses {
            println!("  {:<6} {}", addr.family(), addr);
        }
    }
    if report.interfaces.is_empty() {
        println!("  {}", "no addresses found".dimmed());
    }
}

pub fn print_dns(report: &DnsReport) {
    println!();
    if report.records.is_empty() {
        println!("{} no records for {}", "DNS:".bright_blue().bold(), report.hostname.bright_cyan());
        return;
    }
    println!("{:<6} {:<40} {:>8}  {}", "TYPE", "VALUE", "TTL", "NAME");
    for record in &report.records {
        let ttl = record.ttl.map(|t| t.to_string()).unwrap_or_else(|| "-".to_string());
        println!(
            "{:<6} {:<40} {:>8}  {}",
            record.record_type.bright_blue(),
            record.value,
            ttl,
            record.name.dimmed()
        );
    }
    println!();
    println!(
        "{} {} records for {}",
        "DNS:".bright_blue().bold(),
        report.records.len(),
        report.hostname.bright_cyan()
    );
}
