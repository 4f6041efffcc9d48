use std::{env, fs, path::PathBuf};

fn main() {
    // 1) Handle memory.x based on target
    let target = env::var("TARGET").unwrap();
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());

    if target.starts_with("thumbv8m") {
        // Pico 2 ARM: copy memory-pico2.x to OUT_DIR as memory.x
        install_memory_x("memory-pico2.x", &out_dir);
    } else if target.starts_with("thumbv6m") {
        // Pico 1W: copy memory-pico1w.x to OUT_DIR as memory.x
        install_memory_x("memory-pico1w.x", &out_dir);
    }

    // 2) Load optional env files
    let _ = dotenvy::from_filename(".env");
    load_home_env(".pico.env");
    load_home_env(".env");

    // 3) Bootstrap credentials: a local wifi.txt wins, otherwise WIFI_SSID / WIFI_PASS.
    //    The firmware only reads this when flash holds no settings record yet.
    let bootstrap = match fs::read_to_string("wifi.txt") {
        Ok(text) => text,
        Err(_) => {
            let wifi_ssid = env_or_default("WIFI_SSID", "");
            let wifi_pass = env_or_default("WIFI_PASS", "");
            if env::var_os("CARGO_FEATURE_WIFI").is_some() && wifi_ssid.is_empty() {
                println!(
                    "cargo:warning=WIFI feature enabled but neither wifi.txt nor WIFI_SSID is set; first boot will fail"
                );
            }
            format!("{wifi_ssid}\n{wifi_pass}\n")
        }
    };
    fs::write(out_dir.join("wifi.txt"), bootstrap).expect("Failed to write wifi.txt");

    println!("cargo:rerun-if-env-changed=WIFI_SSID");
    println!("cargo:rerun-if-env-changed=WIFI_PASS");
    println!("cargo:rerun-if-changed=wifi.txt");
    println!("cargo:rerun-if-changed=.env");
}

fn install_memory_x(file: &str, out_dir: &PathBuf) {
    let memory_x = fs::read_to_string(file).unwrap_or_else(|_| panic!("Failed to read {file}"));
    fs::write(out_dir.join("memory.x"), memory_x).expect("Failed to write memory.x");
    println!("cargo:rustc-link-search={}", out_dir.display());
    println!("cargo:rerun-if-changed={file}");
}

fn load_home_env(file: &str) {
    let home = match env::var_os("USERPROFILE").or_else(|| env::var_os("HOME")) {
        Some(path) => PathBuf::from(path),
        None => return,
    };
    let path = home.join(file);
    let _ = dotenvy::from_path(&path);
}

fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
