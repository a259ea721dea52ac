// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: JSON host configuration path
fn config_arg() -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .value_name("PATH")
        .required(true)
        .help("Path to the JSON host configuration")
}

fn legacy_arg() -> Arg {
    Arg::new("legacy")
        .long("legacy")
        .action(ArgAction::SetTrue)
        .help("Resolve against the legacy (first-generation) catalog")
}

fn build_cli() -> Command {
    Command::new("cloudflock")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Migrate a running Unix host onto a replacement host")
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .global(true)
                .help("Stream remote PTY buffers to stdout"),
        )
        .subcommand(
            Command::new("profile")
                .about("Profile a host and report a destination recommendation")
                .arg(config_arg())
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Emit the profile as JSON"),
                )
                .arg(legacy_arg()),
        )
        .subcommand(
            Command::new("migrate")
                .about("Migrate a host onto its destination")
                .arg(config_arg())
                .arg(
                    Arg::new("resume")
                        .long("resume")
                        .action(ArgAction::SetTrue)
                        .help("Reuse the configured destination instead of provisioning"),
                )
                .arg(legacy_arg()),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completions")
                .arg(Arg::new("shell").required(true)),
        )
}

fn main() -> std::io::Result<()> {
    let out_dir = match env::var_os("OUT_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => return Ok(()),
    };

    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer: Vec<u8> = Vec::new();
    man.render(&mut buffer)?;
    fs::write(out_dir.join("cloudflock.1"), buffer)?;

    println!("cargo:rerun-if-changed=build.rs");
    Ok(())
}
