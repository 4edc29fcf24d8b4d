// Host tool: unwrap/expect/panic acceptable outside the device crates.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod convert;
mod report;
mod wav;

use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Parser};
use pdm::Oversampling;
use platform::config::REFERENCE_CLOCK_HZ;

/// Convert a mono 16-bit WAV file (8 or 16 kHz) to a raw PDM stream.
///
/// The output has no header. Write it to the card starting at sector 0 and
/// build the player with the divisor and sector maximum printed at the end.
#[derive(Parser, Debug)]
#[command(name = "pdmconv")]
#[command(version)]
#[command(disable_help_flag = true)]
struct Cli {
    /// Oversampling ratio R (1-255): each sample becomes 2·R output bits
    #[arg(long, value_name = "R", value_parser = parse_osr)]
    osr: Oversampling,

    /// Serial clock generator reference frequency
    #[arg(long, value_name = "HZ", default_value_t = REFERENCE_CLOCK_HZ)]
    clock_hz: u32,

    /// Input WAV file
    input: PathBuf,

    /// Output PDM stream
    output: PathBuf,

    /// Print help
    #[arg(short = 'h', long = "help", visible_alias = "usage", action = ArgAction::Help)]
    help: Option<bool>,
}

fn parse_osr(s: &str) -> Result<Oversampling, String> {
    let ratio: u8 = s
        .parse()
        .map_err(|_| format!("`{s}` is not a ratio between 1 and 255"))?;
    Oversampling::new(ratio).map_err(|e| e.to_string())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    tracing::debug!(?cli, "parsed arguments");

    let job = convert::Job {
        input: cli.input,
        output: cli.output,
        osr: cli.osr,
        clock_hz: cli.clock_hz,
    };
    let plan = convert::run(&job)?;
    report::print(&job, &plan);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn osr_parser_rejects_zero_and_overflow() {
        assert_eq!(parse_osr("4").unwrap().get(), 4);
        assert!(parse_osr("0").unwrap_err().contains("between 1 and 255"));
        assert!(parse_osr("256").unwrap_err().contains("256"));
        assert!(parse_osr("four").is_err());
    }

    #[test]
    fn clock_defaults_to_the_reference_board() {
        let cli = Cli::try_parse_from(["pdmconv", "--osr", "2", "in.wav", "out.pdm"]).unwrap();
        assert_eq!(cli.clock_hz, REFERENCE_CLOCK_HZ);
        assert_eq!(cli.osr.get(), 2);
    }

    #[test]
    fn usage_is_an_alias_for_help() {
        let err = Cli::try_parse_from(["pdmconv", "--usage"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }
}
