//! Stage the per-core linker scripts.
//!
//! Each binary links against its own memory map (`cm7.x` / `cm4.x`); both
//! include `device.x`, which provides the weak handler defaults.

use std::env;
use std::error::Error;
use std::fs;
use std::path::PathBuf;

const SCRIPTS: [&str; 3] = ["cm7.x", "cm4.x", "device.x"];

fn main() -> Result<(), Box<dyn Error>> {
    println!("cargo:rerun-if-changed=build.rs");

    if env::var_os("CARGO_FEATURE_HARDWARE").is_none() {
        return Ok(());
    }

    let out = PathBuf::from(env::var_os("OUT_DIR").ok_or("OUT_DIR not set")?);
    let manifest = PathBuf::from(env::var_os("CARGO_MANIFEST_DIR").ok_or("CARGO_MANIFEST_DIR not set")?);
    for script in SCRIPTS {
        fs::copy(manifest.join(script), out.join(script))?;
        println!("cargo:rerun-if-changed={script}");
    }
    println!("cargo:rustc-link-search={}", out.display());
    println!("cargo:rustc-link-arg-bin=titan-cm7=-Tcm7.x");
    println!("cargo:rustc-link-arg-bin=titan-cm4=-Tcm4.x");
    println!("cargo:rustc-link-arg-bins=--nmagic");
    Ok(())
}
