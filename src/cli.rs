//! Command-line interface definitions.
//!
//! Uses clap derive API for argument parsing.

use clap::{Args, Parser, Subcommand};

use crate::client::REQUEST_TIMEOUT_SECS;
use crate::geo::GeoPoint;
use crate::output::Format;
use crate::query::{DateBound, DateRules, SearchParameters, USGS_QUERY_URL};

/// Search the USGS earthquake catalog around a point.
#[derive(Parser, Debug)]
#[command(name = "quakesearch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Command to run
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose debug logging
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(long, global = true)]
    pub quiet: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one search and print the matching earthquakes
    Search(SearchArgs),

    /// Print the catalog request URL without sending it
    Url(QueryArgs),

    /// Start the map dashboard
    Ui(UiArgs),
}

/// Search form fields shared by every command.
#[derive(Args, Debug, Clone)]
pub struct QueryArgs {
    /// Search center: lat,lng
    #[arg(long, short = 'l', default_value = "38.46,-144.56", value_parser = parse_location, allow_hyphen_values = true)]
    pub location: GeoPoint,

    /// Start date (YYYY-MM-DD, or 30_days_before)
    #[arg(long, default_value = "1900-01-01", value_parser = parse_date_bound)]
    pub start: DateBound,

    /// End date (YYYY-MM-DD, or today)
    #[arg(long, default_value = "today", value_parser = parse_date_bound)]
    pub end: DateBound,

    /// Minimum magnitude (0-10)
    #[arg(long, default_value = "7.5")]
    pub min_magnitude: f64,

    /// Maximum magnitude (0-10)
    #[arg(long, default_value = "10")]
    pub max_magnitude: f64,

    /// Search radius in km (100-20000)
    #[arg(long, short = 'r', default_value = "3000")]
    pub radius: f64,

    /// Maximum results to return (10-1000)
    #[arg(long, short = 'n', default_value = "50")]
    pub limit: u32,

    /// Accept a start date equal to today
    #[arg(long)]
    pub allow_start_today: bool,

    /// Catalog query endpoint
    #[arg(long, default_value = USGS_QUERY_URL)]
    pub base_url: String,
}

impl QueryArgs {
    /// The search form described by these arguments.
    #[must_use]
    pub fn params(&self) -> SearchParameters {
        SearchParameters {
            location: Some(self.location),
            start: Some(self.start),
            end: Some(self.end),
            min_magnitude: self.min_magnitude,
            max_magnitude: self.max_magnitude,
            radius_km: self.radius,
            result_limit: self.limit,
        }
    }

    #[must_use]
    pub fn rules(&self) -> DateRules {
        DateRules {
            start_may_be_today: self.allow_start_today,
        }
    }
}

/// Arguments for the `search` command.
#[derive(Args, Debug)]
pub struct SearchArgs {
    #[command(flatten)]
    pub query: QueryArgs,

    /// Output format
    #[arg(long, short = 'f', default_value = "human", value_parser = parse_format)]
    pub format: Format,

    /// Also print a magnitude histogram (human format only)
    #[arg(long)]
    pub histogram: bool,

    /// Request timeout in seconds
    #[arg(long, default_value_t = REQUEST_TIMEOUT_SECS)]
    pub timeout: u64,

    /// Milliseconds before a pending search is reported as slow
    #[arg(long, default_value = "3000")]
    pub slow_after_ms: u64,
}

/// Arguments for the `ui` command.
#[derive(Args, Debug)]
pub struct UiArgs {
    /// Initial form values
    #[command(flatten)]
    pub query: QueryArgs,

    /// Port to listen on
    #[arg(long, short = 'p', default_value = "8080")]
    pub port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Request timeout in seconds
    #[arg(long, default_value_t = REQUEST_TIMEOUT_SECS)]
    pub timeout: u64,

    /// Milliseconds before a pending search is reported as slow
    #[arg(long, default_value = "3000")]
    pub slow_after_ms: u64,

    /// Open browser automatically
    #[arg(long)]
    pub open: bool,
}

/// Parse a search center from string.
fn parse_location(s: &str) -> Result<GeoPoint, String> {
    s.parse()
}

/// Parse a date or relative date rule from string.
fn parse_date_bound(s: &str) -> Result<DateBound, String> {
    s.parse()
}

/// Parse an output format from string.
fn parse_format(s: &str) -> Result<Format, String> {
    s.parse()
}
