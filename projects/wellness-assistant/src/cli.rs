use clap::{Parser, Subcommand};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// JSON configuration file
    #[arg(long, global = true, env = "WELLNESS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory for session summaries and calibration data
    #[arg(long, global = true, env = "WELLNESS_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// API key for the cloud speech recognizer
    #[arg(long, global = true, env = "WELLNESS_SPEECH_API_KEY", hide_env_values = true)]
    pub speech_api_key: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run an interactive wellness session (default)
    Run(RunArgs),
    /// Check camera, microphone and speech output, then exit
    Test(RunArgs),
    /// List saved session summaries
    History,
    /// Train breathing cadence from microphone amplitude
    Cadence(CadenceArgs),
    /// Write or check configuration files
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args, Debug, Clone)]
pub struct RunArgs {
    /// Camera index
    #[arg(long)]
    pub camera: Option<i32>,

    /// Seconds between breathing sessions
    #[arg(long)]
    pub breathing_interval: Option<u64>,

    /// Disable the breathing and chant worker
    #[arg(long)]
    pub no_breathing: bool,

    /// Log spoken guidance instead of voicing it
    #[arg(long)]
    pub mute: bool,

    /// Serve the live dashboard
    #[arg(long)]
    pub dashboard: bool,

    /// Dashboard host
    #[arg(long, default_value = "127.0.0.1")]
    pub host: IpAddr,

    /// Dashboard port
    #[arg(long, default_value_t = 12207)]
    pub port: u16,

    /// Start from the last saved calibration instead of calibrating again
    #[arg(long)]
    pub reuse_calibration: bool,

    /// Skip the component check before the session
    #[arg(long)]
    pub skip_component_test: bool,
}

impl Default for RunArgs {
    fn default() -> Self {
        Self {
            camera: None,
            breathing_interval: None,
            no_breathing: false,
            mute: false,
            dashboard: false,
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 12207,
            reuse_calibration: false,
            skip_component_test: false,
        }
    }
}

#[derive(clap::Args, Debug, Clone)]
pub struct CadenceArgs {
    /// Seconds of normal breathing used to set the amplitude threshold
    #[arg(long, default_value_t = 5.0)]
    pub calibration_secs: f64,

    /// Cycles to score before stopping
    #[arg(long, default_value_t = 10)]
    pub cycles: usize,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write the default configuration to a file
    Init { path: PathBuf },
    /// Validate a configuration file
    Check { path: PathBuf },
}

impl Args {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
