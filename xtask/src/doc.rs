use anyhow::{Context, Result};
use colored::Colorize;
use std::process::Command;
use std::time::Instant;

/// Documented packages, each with the features that make it build on the
/// host, and the crate name its index lives under.
const PACKAGES: &[(&str, &str, &str)] = &[
    ("platform", "simulator", "platform"),
    ("flight-computer", "std", "flight_computer"),
];

/// `cargo doc` arguments for one package.
fn doc_args(package: &'static str, features: &'static str, open: bool) -> Vec<&'static str> {
    let mut args = vec![
        "doc",
        "-p",
        package,
        "--features",
        features,
        "--no-deps",
        "--document-private-items",
    ];
    if open {
        args.push("--open");
    }
    args
}

fn index_path(crate_name: &str) -> String {
    format!("target/doc/{crate_name}/index.html")
}

pub fn run(open: bool) -> Result<()> {
    println!();
    println!("{}", "📚 Building documentation...".cyan().bold());
    println!();

    let start = Instant::now();
    let last = PACKAGES.len().saturating_sub(1);

    for (index, &(package, features, _)) in PACKAGES.iter().enumerate() {
        println!("{}", format!("  Documenting {package}...").cyan());
        // Only the last package opens a browser.
        let output = Command::new("cargo")
            .args(doc_args(package, features, open && index == last))
            .output()
            .with_context(|| format!("Failed to document {package}"))?;

        if !output.status.success() {
            eprintln!("{}", format!("✗ Documenting {package} failed").red().bold());
            eprintln!();
            eprintln!("{}", String::from_utf8_lossy(&output.stderr));
            anyhow::bail!("Documentation build failed");
        }
    }

    println!(
        "{}",
        format!(
            "✓ Documentation built in {:.2}s",
            start.elapsed().as_secs_f64()
        )
        .green()
    );

    if !open {
        println!();
        for &(_, _, crate_name) in PACKAGES {
            println!("   {}", index_path(crate_name).dimmed());
        }
        println!(
            "   {}",
            "Or run 'cargo run -p xtask -- doc --open'".dimmed()
        );
    }

    println!();

    Ok(())
}

#[cfg(test)]
#[allow(clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn every_package_builds_on_host() {
        let args = doc_args("platform", "simulator", false);
        assert_eq!(&args[..5], ["doc", "-p", "platform", "--features", "simulator"]);
        assert!(!args.contains(&"--workspace"));
        assert_eq!(doc_args("flight-computer", "std", true).last(), Some(&"--open"));
    }

    #[test]
    fn index_paths_use_crate_names() {
        let paths: Vec<String> = PACKAGES.iter().map(|&(_, _, name)| index_path(name)).collect();
        assert_eq!(
            paths,
            [
                "target/doc/platform/index.html",
                "target/doc/flight_computer/index.html"
            ]
        );
    }
}
