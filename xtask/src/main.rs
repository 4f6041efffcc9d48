//! Build automation tasks for the ambient sensor node.
//!
//! Run with: `cargo xtask <command>`

use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use std::process::{Command, ExitCode};

const FIRMWARE: &str = "ambient-node";

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Build automation for the ambient sensor node", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all checks: build firmware for both boards, run host tests, generate docs
    CheckAll,
    /// Build the firmware image
    Build {
        #[arg(long, default_value = "pico1")]
        board: Board,
        /// Build in release mode
        #[arg(long)]
        release: bool,
    },
    /// Build a UF2 firmware file for flashing to the Pico W
    Uf2 {
        #[arg(long, default_value = "pico1")]
        board: Board,
    },
    /// Run the host test suite
    Test,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum Board {
    Pico1,
    Pico2,
}

impl std::fmt::Display for Board {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Board::Pico1 => write!(f, "pico1"),
            Board::Pico2 => write!(f, "pico2"),
        }
    }
}

impl Board {
    fn target(self) -> &'static str {
        match self {
            Board::Pico1 => "thumbv6m-none-eabi",
            Board::Pico2 => "thumbv8m.main-none-eabihf",
        }
    }

    fn features(self) -> String {
        format!("{self},arm,wifi,defmt")
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::CheckAll => check_all(),
        Commands::Build { board, release } => report(build_firmware(board, release)),
        Commands::Uf2 { board } => build_uf2(board),
        Commands::Test => report(run_host_tests()),
    }
}

fn report(ok: bool) -> ExitCode {
    if ok {
        println!("{}", "Done! ✨".green());
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn check_all() -> ExitCode {
    for board in [Board::Pico1, Board::Pico2] {
        println!("{}", format!("==> Building firmware ({board})...").cyan());
        if !build_firmware(board, false) {
            return ExitCode::FAILURE;
        }
    }

    println!("\n{}", "==> Running host tests...".cyan());
    if !run_host_tests() {
        return ExitCode::FAILURE;
    }

    println!("\n{}", "==> Building documentation...".cyan());
    let board = Board::Pico1;
    if !run_command(Command::new("cargo").current_dir(workspace_root()).args([
        "doc",
        "--lib",
        "--target",
        board.target(),
        "--no-deps",
        "--features",
        &board.features(),
        "--no-default-features",
    ])) {
        return ExitCode::FAILURE;
    }

    println!("\n{}", "==> All checks passed! 🎉".green().bold());
    ExitCode::SUCCESS
}

fn build_firmware(board: Board, release: bool) -> bool {
    let features = board.features();
    println!(
        "{}",
        format!("Building {FIRMWARE} with features: {features}").cyan()
    );

    let mut cmd = Command::new("cargo");
    cmd.current_dir(workspace_root()).args([
        "build",
        "--bin",
        FIRMWARE,
        "--target",
        board.target(),
        "--features",
        &features,
        "--no-default-features",
    ]);
    if release {
        cmd.arg("--release");
    }
    run_command(&mut cmd)
}

fn run_host_tests() -> bool {
    let mut cmd = Command::new("cargo");
    cmd.current_dir(workspace_root()).arg("test");
    match host_target() {
        Some(target) => {
            println!(
                "  {}",
                format!("Using host target: {target}").bright_black()
            );
            cmd.arg("--target").arg(target);
        }
        None => println!(
            "{}",
            "  Unable to detect host target; relying on cargo default.".bright_black()
        ),
    }
    cmd.args(["--no-default-features", "--features", "host"]);
    run_command(&mut cmd)
}

fn build_uf2(board: Board) -> ExitCode {
    let target = board.target();
    println!("{}", format!("Building UF2 for {board}").cyan());
    println!("  Target: {}", target.bright_black());

    if !build_firmware(board, true) {
        return ExitCode::FAILURE;
    }

    let elf_path = format!("target/{target}/release/{FIRMWARE}");
    let uf2_path = format!("{FIRMWARE}-{board}.uf2");

    println!("\n{}", "Converting to UF2 format...".cyan());
    if run_command(
        Command::new("elf2uf2-rs")
            .current_dir(workspace_root())
            .args([&elf_path, &uf2_path]),
    ) {
        println!("{}", format!("UF2 created: {uf2_path} 🚀").green().bold());
        println!("{}", "Ready to drag-and-drop to your Pico!".bright_black());
        ExitCode::SUCCESS
    } else {
        println!(
            "{}",
            "Note: Install elf2uf2-rs with: cargo install elf2uf2-rs".yellow()
        );
        ExitCode::FAILURE
    }
}

fn workspace_root() -> std::path::PathBuf {
    std::env::current_dir().expect("Failed to get current directory")
}

fn host_target() -> Option<String> {
    let output = Command::new("rustc").arg("-vV").output().ok()?;
    if !output.status.success() {
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .lines()
        .find_map(|line| line.strip_prefix("host: "))
        .map(|host| host.trim().to_string())
}

fn run_command(cmd: &mut Command) -> bool {
    match cmd.status() {
        Ok(status) => status.success(),
        Err(e) => {
            eprintln!("{}", format!("Failed to execute command: {e}").red());
            false
        }
    }
}
