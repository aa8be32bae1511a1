use anyhow::{Context, Result};
use colored::Colorize;
use std::process::Command;
use std::time::Instant;

use crate::{Core, CHIP, TARGET};

pub fn run(release: bool, core: Core) -> Result<()> {
    let mode = if release { "release" } else { "debug" };

    println!();
    println!(
        "{}",
        format!("🔨 Building core images ({} mode)...", mode)
            .cyan()
            .bold()
    );
    println!();

    let build_start = Instant::now();
    let mut build_cmd = Command::new("cargo");
    build_cmd
        .arg("build")
        .arg("-p")
        .arg("flight-computer")
        .arg("--target")
        .arg(TARGET)
        .arg("--features")
        .arg("hardware");
    for bin in core.binaries() {
        build_cmd.arg("--bin").arg(bin);
    }
    if release {
        build_cmd.arg("--release");
    }

    let build_output = build_cmd.output().context("Failed to run cargo build")?;

    if !build_output.status.success() {
        eprintln!("{}", "✗ Build failed".red().bold());
        eprintln!();
        eprintln!("{}", String::from_utf8_lossy(&build_output.stderr));
        anyhow::bail!("Build failed");
    }

    println!(
        "{}",
        format!(
            "✓ Build successful in {:.2}s",
            build_start.elapsed().as_secs_f64()
        )
        .green()
    );
    println!();

    for bin in core.binaries() {
        show_binary_size(&binary_path(release, bin));
        flash(release, bin)?;
    }

    println!("{}", "🚀 Titan flight computer is running on hardware!".bold());
    println!(
        "   {}",
        format!("Use 'probe-rs attach --chip {CHIP} <elf>' to view RTT logs").dimmed()
    );
    println!();

    Ok(())
}

fn binary_path(release: bool, bin: &str) -> String {
    let mode = if release { "release" } else { "debug" };
    format!("target/{TARGET}/{mode}/{bin}")
}

fn flash(release: bool, bin: &str) -> Result<()> {
    println!("{}", format!("📡 Flashing {bin}...").cyan().bold());

    let flash_start = Instant::now();
    let flash_output = Command::new("probe-rs")
        .arg("download")
        .arg(binary_path(release, bin))
        .arg("--chip")
        .arg(CHIP)
        .arg("--probe-index")
        .arg("0")
        .output()
        .context("Failed to run probe-rs. Is probe-rs installed? (cargo install probe-rs-tools)")?;

    if !flash_output.status.success() {
        eprintln!("{}", "✗ Flash failed".red().bold());
        eprintln!();
        eprintln!("{}", String::from_utf8_lossy(&flash_output.stderr));
        anyhow::bail!("Flash failed - check that the probe is connected and the device is powered");
    }

    println!(
        "{}",
        format!(
            "✓ {bin} flashed in {:.2}s",
            flash_start.elapsed().as_secs_f64()
        )
        .green()
    );
    println!();
    Ok(())
}

fn show_binary_size(path: &str) {
    let output = Command::new("rust-size").arg(path).arg("-A").output();

    if let Ok(out) = output {
        if out.status.success() {
            println!("{}", format!("📊 {path}:").cyan());
            for line in String::from_utf8_lossy(&out.stdout).lines() {
                println!("   {}", line.dimmed());
            }
        }
    }
}
