use std::env;
use std::fs;
use std::path::Path;

fn main() {
    // Version precedence: CLOUD_MAKER_VERSION env, then the VERSION file, then Cargo.toml
    let version = if let Ok(v) = env::var("CLOUD_MAKER_VERSION") {
        v
    } else {
        let version_file = Path::new("VERSION");
        if version_file.exists() {
            fs::read_to_string(version_file)
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string())
                .trim()
                .to_string()
        } else {
            env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "0.0.1".to_string())
        }
    };

    println!("cargo:rustc-env=CLOUD_MAKER_VERSION={}", version);
    println!("cargo:rerun-if-changed=VERSION");
    println!("cargo:rerun-if-env-changed=CLOUD_MAKER_VERSION");
}
