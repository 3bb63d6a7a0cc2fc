//! `link run`: construct and enable a [`Controller`], start discovery
//! and the metrics HTTP server, and log peer-count/tempo/start-stop
//! transitions until interrupted. Stands in for the teacher's
//! `stream`/`receive` subcommands (`bark::stream::run`/`bark::receive::run`)
//! — there is no audio device here (per spec §1's Non-goals), so a
//! periodic synthetic tick substitutes for an audio callback,
//! demonstrating the realtime capture API against [`crate::status::LinkStatus`]
//! instead of claiming real audio I/O.

use std::time::Duration;

use structopt::StructOpt;

use link_core::{Clock, Controller};
use link_network::interfaces::HostPlatform;
use link_network::reactor::Reactor;
use link_protocol::Beats;
use link_util::clock::MonotonicClock;

use crate::status::{self, LinkStatus, SharedStatus};
use crate::stats::server::{self, MetricsOpt};
use crate::RunError;

#[derive(StructOpt)]
pub struct RunOpt {
    /// Initial tempo in beats per minute, clamped to [20, 999].
    #[structopt(long, env = "LINK_RUN_BPM", default_value = "120.0")]
    pub bpm: f64,

    /// Quantum in beats used for join/reset phase-matching.
    #[structopt(long, env = "LINK_RUN_QUANTUM", default_value = "4.0")]
    pub quantum: f64,

    #[structopt(flatten)]
    pub metrics: MetricsOpt,

    /// How often the synthetic tick reads and logs the current beat.
    #[structopt(long, default_value = "1000")]
    pub tick_interval_ms: u64,
}

pub fn run(opt: RunOpt) -> Result<(), RunError> {
    let clock = MonotonicClock;
    let (mut controller, audio_io) = Controller::new(clock, opt.bpm, Beats::from_f64(opt.quantum), rand::random::<u8>);

    let status = status::shared(LinkStatus { tempo_bpm: controller.tempo().bpm(), ..LinkStatus::default() });

    controller.set_num_peers_callback({
        let status = SharedStatus::clone(&status);
        move |n| {
            log::info!("numPeers -> {n}");
            status.lock().expect("status mutex poisoned").num_peers = n;
        }
    });
    controller.set_tempo_callback({
        let status = SharedStatus::clone(&status);
        move |tempo| {
            log::info!("tempo -> {:.2} bpm", tempo.bpm());
            status.lock().expect("status mutex poisoned").tempo_bpm = tempo.bpm();
        }
    });
    controller.set_start_stop_callback({
        let status = SharedStatus::clone(&status);
        move |start_stop| {
            log::info!("isPlaying -> {}", start_stop.is_playing);
            status.lock().expect("status mutex poisoned").is_playing = start_stop.is_playing;
        }
    });

    let (_, broadcast) = controller.enable(true);
    let session_id = controller.session_id();
    status.lock().expect("status mutex poisoned").session_id = session_id.to_string();
    let _ = broadcast; // the reactor broadcasts current_broadcast_state() on its own heartbeat

    // axum/tokio need a running Tokio runtime; kept alive for the
    // lifetime of `run` so the spawned server task keeps going.
    let rt = tokio::runtime::Runtime::new().map_err(RunError::Io)?;
    rt.block_on(server::start(&opt.metrics, SharedStatus::clone(&status))).map_err(RunError::Metrics)?;

    let reactor = Reactor::new(controller, clock, HostPlatform);
    link_util::thread::spawn_named("link-io", move || reactor.run())?;

    loop {
        std::thread::sleep(Duration::from_millis(opt.tick_interval_ms));
        let now = clock.now_micros();
        let session_state = audio_io.capture();
        let beat = session_state.beat_at_time(now).as_f64();

        {
            let mut status = status.lock().expect("status mutex poisoned");
            status.beat = beat;
            status.tempo_bpm = session_state.tempo().bpm();
            status.is_playing = session_state.is_playing();
        }

        log::debug!("tick: beat={beat:.3} tempo={:.2}bpm playing={}", session_state.tempo().bpm(), session_state.is_playing());
    }
}
