//! Bakes the guest runtime locations into the library.
//!
//! Each value can be overridden through an environment variable of the same
//! name. Otherwise the interpreter pyo3 builds against (`PYO3_PYTHON`, or
//! `python3`) is asked through `sysconfig`.

use std::env;
use std::process::Command;

const STDLIB_DIR: &str = "IMAGER_PY_STDLIB_DIR";
const RUNTIME_LIB_DIR: &str = "IMAGER_PY_RUNTIME_LIB_DIR";
const PLATFORM_TAG: &str = "IMAGER_PY_PLATFORM_TAG";

const DEFAULT_STDLIB_DIR: &str = "/usr/lib/python3.10";
const DEFAULT_RUNTIME_LIB_DIR: &str = "/usr/lib/x86_64-linux-gnu";
const DEFAULT_PLATFORM_TAG: &str = "config-3.10-x86_64-linux-gnu";

const QUERY: &str = r#"
import os, sysconfig
print(sysconfig.get_path("stdlib") or "")
print(sysconfig.get_config_var("LIBDIR") or "")
print(os.path.basename(sysconfig.get_config_var("LIBPL") or ""))
"#;

struct Detected {
    stdlib_dir: Option<String>,
    runtime_lib_dir: Option<String>,
    platform_tag: Option<String>,
}

fn query_interpreter() -> Detected {
    let python = env::var("PYO3_PYTHON").unwrap_or_else(|_| "python3".to_string());
    let output = Command::new(&python).args(["-c", QUERY]).output();

    let lines: Vec<String> = match output {
        Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout)
            .lines()
            .map(|l| l.trim().to_string())
            .collect(),
        _ => {
            println!("cargo:warning=could not query {python}, using default guest paths");
            Vec::new()
        }
    };

    let pick = |i: usize| lines.get(i).filter(|s| !s.is_empty()).cloned();
    Detected {
        stdlib_dir: pick(0),
        runtime_lib_dir: pick(1),
        platform_tag: pick(2),
    }
}

fn main() {
    for name in [STDLIB_DIR, RUNTIME_LIB_DIR, PLATFORM_TAG, "PYO3_PYTHON"] {
        println!("cargo:rerun-if-env-changed={name}");
    }
    println!("cargo:rerun-if-changed=build.rs");

    let detected = query_interpreter();

    let resolve = |name: &str, found: Option<String>, fallback: &str| {
        let value = env::var(name)
            .ok()
            .filter(|v| !v.is_empty())
            .or(found)
            .unwrap_or_else(|| fallback.to_string());
        println!("cargo:rustc-env={name}={value}");
    };

    resolve(STDLIB_DIR, detected.stdlib_dir, DEFAULT_STDLIB_DIR);
    resolve(RUNTIME_LIB_DIR, detected.runtime_lib_dir, DEFAULT_RUNTIME_LIB_DIR);
    resolve(PLATFORM_TAG, detected.platform_tag, DEFAULT_PLATFORM_TAG);
}
