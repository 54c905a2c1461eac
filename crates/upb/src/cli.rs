//! Clap derive structures for the `upb` CLI.
//!
//! Defines the complete command tree, global flags, and shared types.

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// upb -- control UPB lighting networks through a PIM
#[derive(Debug, Parser)]
#[command(
    name = "upb",
    version,
    about = "Control UPB lighting networks from the command line",
    long_about = "Talks to a UPB Powerline Interface Module over TCP or a serial port.\n\n\
        Devices and links come from a UPStart export named in the profile\n\
        or passed with --upstart.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// PIM profile to use
    #[arg(long, short = 'p', env = "UPB_PROFILE", global = true)]
    pub profile: Option<String>,

    /// PIM URL, e.g. tcp://10.0.0.20 or serial:///dev/ttyUSB0 (overrides profile)
    #[arg(long, short = 'u', env = "UPB_URL", global = true)]
    pub url: Option<String>,

    /// Driver flags, e.g. "no_sync,tx_count=2" (overrides profile)
    #[arg(long, env = "UPB_FLAGS", global = true)]
    pub flags: Option<String>,

    /// UPStart export to import (overrides profile)
    #[arg(long, env = "UPB_UPSTART", global = true)]
    pub upstart: Option<std::path::PathBuf>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "UPB_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Seconds to wait for the PIM to come up and answer
    #[arg(long, env = "UPB_TIMEOUT", default_value = "30", global = true)]
    pub timeout: u64,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List and control devices
    #[command(alias = "dev", alias = "d")]
    Devices(DevicesArgs),

    /// List and control links (scenes)
    #[command(alias = "l")]
    Links(LinksArgs),

    /// Stream network traffic and connection events
    #[command(alias = "mon")]
    Monitor(MonitorArgs),

    /// Build a PIM frame without sending it
    Encode(EncodeArgs),

    /// Decode a UPB message from hex
    Decode(DecodeArgs),

    /// Manage CLI configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Devices ──────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct DevicesArgs {
    #[command(subcommand)]
    pub command: DevicesCommand,
}

#[derive(Debug, Subcommand)]
pub enum DevicesCommand {
    /// List imported devices
    #[command(alias = "ls")]
    List {
        /// Connect and ask every device for its level first
        #[arg(long)]
        refresh: bool,
    },

    /// Show one device
    Show {
        /// Device index, e.g. 194_9_0
        index: String,
    },

    /// Turn a device on
    On {
        index: String,
        /// Level, 0-100
        #[arg(long, short = 'l', default_value = "100")]
        level: u8,
        /// Fade rate in seconds
        #[arg(long, short = 'r')]
        rate: Option<f64>,
    },

    /// Turn a device off
    Off {
        index: String,
        #[arg(long, short = 'r')]
        rate: Option<f64>,
    },

    /// Start fading towards a level
    Fade {
        index: String,
        level: u8,
        #[arg(long, short = 'r')]
        rate: Option<f64>,
    },

    /// Stop a fade in progress
    Stop { index: String },

    /// Blink a device
    Blink {
        index: String,
        /// Blink rate code
        #[arg(default_value = "20")]
        rate: u8,
    },

    /// Ask a device for its current level and print it
    Status { index: String },
}

// ── Links ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct LinksArgs {
    #[command(subcommand)]
    pub command: LinksCommand,
}

#[derive(Debug, Subcommand)]
pub enum LinksCommand {
    /// List imported links
    #[command(alias = "ls")]
    List,

    /// Show one link and its members
    Show {
        /// Link index, e.g. 194_5
        index: String,
    },

    /// Activate a link (members go to their presets)
    Activate { index: String },

    /// Deactivate a link (members turn off)
    Deactivate { index: String },

    /// Send every member of a link to a level
    Goto {
        index: String,
        level: u8,
        #[arg(long, short = 'r')]
        rate: Option<f64>,
    },

    /// Start fading a link towards a level
    Fade {
        index: String,
        level: u8,
        #[arg(long, short = 'r')]
        rate: Option<f64>,
    },

    /// Stop a link fade in progress
    Stop { index: String },

    /// Blink every member of a link
    Blink {
        index: String,
        #[arg(default_value = "20")]
        rate: u8,
    },
}

// ── Monitor ──────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct MonitorArgs {
    /// Exit after this many network messages
    #[arg(long, short = 'n')]
    pub count: Option<usize>,
}

// ── Encode / Decode ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum EncodeKind {
    Activate,
    Deactivate,
    Goto,
    FadeStart,
    FadeStop,
    Blink,
    ReportState,
}

#[derive(Debug, Args)]
pub struct EncodeArgs {
    /// Message to build
    pub kind: EncodeKind,

    /// Network id
    pub network: u8,

    /// Unit or link id
    pub id: u8,

    /// Address a link instead of a device
    #[arg(long)]
    pub link: bool,

    /// Channel of a multi-channel device
    #[arg(long)]
    pub channel: Option<u8>,

    /// Level for goto and fade-start
    #[arg(long, short = 'l', default_value = "100")]
    pub level: u8,

    /// Raw rate code for goto, fade-start and blink
    #[arg(long, short = 'r')]
    pub rate: Option<u8>,

    /// Transmissions per message (1-4)
    #[arg(long, default_value = "1")]
    pub tx_count: u8,
}

#[derive(Debug, Args)]
pub struct DecodeArgs {
    /// Hex message as it follows a "PU" prefix, checksum included
    pub hex: String,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file path
    Path,

    /// Show the loaded configuration
    Show,

    /// List profiles
    Profiles,

    /// Show the gateway settings a profile resolves to
    Resolve,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
