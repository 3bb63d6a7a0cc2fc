//! `link stats`: polls another running instance's metrics endpoint
//! and renders it to the terminal. Mirrors the teacher's `stats`
//! subcommand (`bark::stats::run`) in spirit — a polling loop that
//! repaints one line per peer — but reimplemented as a plain HTTP GET
//! against [`crate::stats::server`] rather than a UDP `StatsRequest`/
//! `StatsReply` round-trip, since LinkAudio's UDP stats protocol is
//! out of scope here at more than interface level.

use std::io::Write;
use std::time::Duration;

use structopt::StructOpt;
use termcolor::{BufferedStandardStream, Color, ColorSpec, WriteColor};
use thiserror::Error;

use crate::status::LinkStatus;
use crate::RunError;

#[derive(StructOpt)]
pub struct StatsOpt {
    /// Address of a running `link run` instance's metrics server,
    /// eg. 127.0.0.1:1530
    #[structopt(long, env = "LINK_STATS_TARGET")]
    pub target: String,

    #[structopt(long, default_value = "500")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("building http client: {0}")]
    Build(reqwest::Error),
}

pub fn run(opt: StatsOpt) -> Result<(), RunError> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .map_err(ClientError::Build)
        .map_err(RunError::Stats)?;

    let url = format!("http://{}/metrics", opt.target.trim_end_matches('/'));
    let mut out = BufferedStandardStream::stdout(termcolor::ColorChoice::Auto);

    loop {
        match client.get(&url).send().and_then(|r| r.json::<LinkStatus>()) {
            Ok(status) => render(&mut out, &opt.target, &status),
            Err(e) => log::warn!("fetching {url}: {e}"),
        }
        std::thread::sleep(Duration::from_millis(opt.poll_interval_ms));
    }
}

fn render(out: &mut dyn WriteColor, target: &str, status: &LinkStatus) {
    let _ = write!(out, "\x1b[2K\r");

    let _ = out.set_color(ColorSpec::new().set_fg(Some(Color::Blue)).set_bold(true));
    let _ = write!(out, "{target:<22}");
    let _ = out.set_color(&ColorSpec::new());

    let _ = write!(out, "  peers={:<3}", status.num_peers);
    let _ = write!(out, "  tempo={:>7.2} bpm", status.tempo_bpm);
    let _ = write!(out, "  beat={:>9.3}", status.beat);

    let _ = out.set_color(ColorSpec::new().set_fg(Some(if status.is_playing { Color::Green } else { Color::Red })).set_bold(true));
    let _ = write!(out, "  {}", if status.is_playing { "PLAYING" } else { "STOPPED" });
    let _ = out.set_color(&ColorSpec::new());

    let _ = write!(out, "  session={}", status.session_id);
    let _ = out.flush();
}
