//! CLI argument definitions for harvest.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `collect` | Acquire one source through its collector's strategy chain |
//! | `providers health` | Ping every configured tool provider |
//! | `providers call` | Make one provider call with fallback resolution |
//! | `cost` | Estimate the transcription cost of an audio duration |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--providers` | `config/providers.json` | Tool provider registry |
//! | `--rules` | none | Collector rules (TOML) |
//! | `--pretty` | `false` | Pretty-print JSON output |
//!
//! # Examples
//!
//! ```bash
//! # Collect a reddit thread, events on stderr, summary on stdout
//! harvest collect https://www.reddit.com/r/rust/comments/abc/title/ --max-items 200
//!
//! # Transcribe a podcast episode with three speakers
//! harvest collect https://cdn.example.com/ep42.mp3 --speakers 3 --language pt-br
//!
//! # Check providers
//! harvest providers health --pretty
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Multi-provider content acquisition.
///
/// Pulls social threads, PDFs and podcast audio through ordered strategy
/// chains (automation actor, native API, raw scrape) and writes one JSON
/// artifact per source.
#[derive(Debug, Parser)]
#[command(name = "harvest", author, version, about = "Multi-provider content acquisition")]
pub struct Cli {
    /// Tool provider registry (JSON, or TOML by extension).
    #[arg(long, global = true, default_value = "config/providers.json")]
    pub providers: PathBuf,

    /// Collector rules (TOML). Built-in defaults apply when omitted.
    #[arg(long, global = true)]
    pub rules: Option<PathBuf>,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Acquire one source and persist its artifact.
    Collect(CollectArgs),
    /// Inspect or call tool providers.
    Providers(ProvidersArgs),
    /// Estimate the transcription cost of an audio duration.
    Cost(CostArgs),
}

#[derive(Debug, Args)]
pub struct CollectArgs {
    /// Source URL or local file path.
    pub url: String,

    /// Platform override (twitter, reddit, linkedin, pdf, podcast).
    #[arg(long)]
    pub platform: Option<String>,

    /// Stable source id; a random one is generated when omitted.
    #[arg(long)]
    pub id: Option<String>,

    /// Item cap; the platform default applies when omitted.
    #[arg(long)]
    pub max_items: Option<usize>,

    /// Audio language (pt, pt-br, en, es, fr, de).
    #[arg(long)]
    pub language: Option<String>,

    /// Expected number of speakers in audio sources.
    #[arg(long)]
    pub speakers: Option<u32>,

    /// Podcast RSS feed used for show and episode metadata.
    #[arg(long)]
    pub feed_url: Option<String>,

    /// Expected audio duration in seconds, used for the cost estimate.
    #[arg(long)]
    pub duration: Option<f64>,

    /// Output root; artifacts land under `<output>/<content_type>/<slug>/`.
    #[arg(long, default_value = "output")]
    pub output: PathBuf,
}

#[derive(Debug, Args)]
pub struct ProvidersArgs {
    #[command(subcommand)]
    pub command: ProvidersCommand,
}

#[derive(Debug, Subcommand)]
pub enum ProvidersCommand {
    /// Ping every enabled provider.
    Health,
    /// Call one provider method.
    Call(CallArgs),
}

#[derive(Debug, Args)]
pub struct CallArgs {
    pub name: String,
    pub method: String,

    /// JSON object passed as params.
    #[arg(long, default_value = "{}")]
    pub params: String,
}

#[derive(Debug, Args)]
pub struct CostArgs {
    /// Audio duration in seconds.
    pub seconds: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_collect_with_overrides() {
        let cli = Cli::try_parse_from([
            "harvest",
            "collect",
            "https://cdn.test/ep.mp3",
            "--speakers",
            "3",
            "--language",
            "pt-br",
            "--output",
            "/tmp/out",
            "--pretty",
        ])
        .expect("parses");

        assert!(cli.pretty);
        assert_eq!(cli.providers, PathBuf::from("config/providers.json"));
        let Command::Collect(args) = cli.command else {
            panic!("expected collect");
        };
        assert_eq!(args.speakers, Some(3));
        assert_eq!(args.language.as_deref(), Some("pt-br"));
        assert_eq!(args.output, PathBuf::from("/tmp/out"));
        assert_eq!(args.max_items, None);
    }

    #[test]
    fn parses_provider_call_with_default_params() {
        let cli = Cli::try_parse_from(["harvest", "providers", "call", "apify", "runActor"]).expect("parses");

        let Command::Providers(ProvidersArgs {
            command: ProvidersCommand::Call(args),
        }) = cli.command
        else {
            panic!("expected providers call");
        };
        assert_eq!(args.name, "apify");
        assert_eq!(args.method, "runActor");
        assert_eq!(args.params, "{}");
    }

    #[test]
    fn rejects_non_numeric_cost() {
        assert!(Cli::try_parse_from(["harvest", "cost", "an hour"]).is_err());
    }
}
