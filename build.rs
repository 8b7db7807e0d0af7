//! Build script for motion-kit.
//!
//! Selects the right `memory.x` for the target so downstream binaries link
//! without their own copy. Host builds take none of these branches.

use std::{env, fs, path::PathBuf};

fn main() {
    println!("cargo:rustc-check-cfg=cfg(rust_analyzer)");

    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let target = env::var("TARGET").unwrap();

    let memory_x_source = if target.starts_with("thumbv8m") {
        // Pico 2 ARM
        Some("memory-pico2.x")
    } else if target.starts_with("riscv32imac") {
        // Pico 2 RISC-V
        Some("memory-pico2-riscv.x")
    } else if target.starts_with("thumbv6m") {
        // Pico 1
        Some("memory-pico1.x")
    } else {
        None
    };

    if let Some(source) = memory_x_source {
        let memory_x =
            fs::read_to_string(source).unwrap_or_else(|_| panic!("Failed to read {source}"));
        let dest = out_dir.join("memory.x");
        fs::write(&dest, memory_x).expect("Failed to write memory.x");
        println!("cargo:rustc-link-search={}", out_dir.display());
        println!("cargo:rerun-if-changed={source}");
    }
}
