use anyhow::{Context, Result};
use colored::Colorize;
use std::process::Command;
use std::time::Instant;

/// Kind of a host test suite.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Kind {
    Unit,
    Integration,
    Doc,
}

/// One `cargo test` invocation.
#[derive(Debug)]
struct Suite {
    name: &'static str,
    kind: Kind,
    args: &'static [&'static str],
}

/// Every host suite, drivers first. The platform crate needs the register
/// model (`simulator`) for its own tests.
const SUITES: &[Suite] = &[
    Suite {
        name: "platform drivers",
        kind: Kind::Unit,
        args: &["-p", "platform", "--features", "simulator", "--lib"],
    },
    Suite {
        name: "application library",
        kind: Kind::Unit,
        args: &["-p", "flight-computer", "--lib"],
    },
    Suite {
        name: "xtask",
        kind: Kind::Unit,
        args: &["-p", "xtask"],
    },
    Suite {
        name: "boot_scenarios",
        kind: Kind::Integration,
        args: &["-p", "flight-computer", "--test", "boot_scenarios"],
    },
    Suite {
        name: "dma_scenarios",
        kind: Kind::Integration,
        args: &["-p", "flight-computer", "--test", "dma_scenarios"],
    },
    Suite {
        name: "rpc_scenarios",
        kind: Kind::Integration,
        args: &["-p", "flight-computer", "--test", "rpc_scenarios"],
    },
    Suite {
        name: "app_pipeline",
        kind: Kind::Integration,
        args: &["-p", "flight-computer", "--test", "app_pipeline"],
    },
    Suite {
        name: "platform doc examples",
        kind: Kind::Doc,
        args: &["-p", "platform", "--features", "simulator", "--doc"],
    },
];

/// Suites selected by the flags. `scenario` narrows integration suites to
/// one test binary and skips everything else.
fn select(unit_only: bool, integration_only: bool, scenario: Option<&str>) -> Vec<&'static Suite> {
    SUITES
        .iter()
        .filter(|suite| match (suite.kind, scenario) {
            (Kind::Integration, Some(name)) => suite.name == name,
            (_, Some(_)) => false,
            (Kind::Unit, None) => !integration_only,
            (Kind::Integration, None) => !unit_only,
            (Kind::Doc, None) => !unit_only && !integration_only,
        })
        .collect()
}

pub fn run(unit_only: bool, integration_only: bool, scenario: Option<&str>) -> Result<()> {
    println!();
    println!("{}", "🧪 Running host tests...".cyan().bold());
    println!();

    let suites = select(unit_only, integration_only, scenario);
    if suites.is_empty() {
        anyhow::bail!("No test suite matches {:?}", scenario.unwrap_or_default());
    }

    let total_start = Instant::now();
    for suite in suites {
        run_suite(suite)?;
    }

    println!(
        "{}",
        format!(
            "✓ All suites passed in {:.2}s",
            total_start.elapsed().as_secs_f64()
        )
        .green()
        .bold()
    );
    println!();

    Ok(())
}

fn run_suite(suite: &Suite) -> Result<()> {
    println!("{}", format!("  Running {}...", suite.name).cyan());
    let start = Instant::now();

    let output = Command::new("cargo")
        .arg("test")
        .args(suite.args)
        .output()
        .with_context(|| format!("Failed to run {}", suite.name))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !output.status.success() {
        eprintln!("{}", format!("  ✗ {} failed", suite.name).red().bold());
        eprintln!();
        for line in stdout.lines().filter(|line| is_failure_line(line)) {
            eprintln!("  {}", line);
        }
        eprintln!("{}", String::from_utf8_lossy(&output.stderr));
        anyhow::bail!("{} failed", suite.name);
    }

    println!(
        "{}",
        format!(
            "  ✓ {} ({}) in {:.2}s",
            suite.name,
            passed_count(&stdout),
            start.elapsed().as_secs_f64()
        )
        .green()
    );
    println!();
    Ok(())
}

/// Lines worth echoing from a failed run: failing tests, panics and the
/// result footer.
fn is_failure_line(line: &str) -> bool {
    line.ends_with("FAILED")
        || line.contains("panicked at")
        || line.starts_with("test result:")
        || line.starts_with("failures:")
}

/// Total of the "N passed" counts across every result footer in `output`.
fn passed_count(output: &str) -> String {
    let total: u32 = output
        .lines()
        .filter_map(|line| line.strip_prefix("test result: "))
        .filter_map(|rest| rest.split(';').next())
        .filter_map(|first| first.rsplit(' ').nth(1))
        .filter_map(|count| count.parse::<u32>().ok())
        .sum();
    format!("{total} passed")
}

#[cfg(test)]
#[allow(clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn names(suites: &[&Suite]) -> Vec<&'static str> {
        suites.iter().map(|suite| suite.name).collect()
    }

    #[test]
    fn default_runs_every_suite() {
        assert_eq!(select(false, false, None).len(), SUITES.len());
    }

    #[test]
    fn platform_suites_enable_the_register_model() {
        for suite in SUITES.iter().filter(|suite| suite.args.contains(&"platform")) {
            assert!(suite.args.contains(&"simulator"), "{}", suite.name);
        }
    }

    #[test]
    fn flags_split_unit_and_integration() {
        let unit = select(true, false, None);
        assert!(unit.iter().all(|suite| suite.kind == Kind::Unit));
        assert_eq!(
            names(&select(false, true, None)),
            ["boot_scenarios", "dma_scenarios", "rpc_scenarios", "app_pipeline"]
        );
    }

    #[test]
    fn scenario_selects_one_binary() {
        let suites = select(false, false, Some("rpc_scenarios"));
        assert_eq!(names(&suites), ["rpc_scenarios"]);
        assert_eq!(suites[0].args.last(), Some(&"rpc_scenarios"));
        assert!(select(false, false, Some("platform drivers")).is_empty());
    }

    #[test]
    fn passed_count_sums_footers() {
        let output = "\
running 3 tests
test result: ok. 3 passed; 0 failed; 0 ignored; 0 measured; 0 filtered out
test result: ok. 12 passed; 0 failed; 1 ignored; 0 measured; 0 filtered out";
        assert_eq!(passed_count(output), "15 passed");
        assert_eq!(passed_count(""), "0 passed");
    }
}
