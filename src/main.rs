use std::path::PathBuf;
use std::thread;

use colored::Colorize;
use structopt::StructOpt;

use gps_rcv::config::{Config, SampleFormat};
use gps_rcv::ephemeris::dump_ephemerides;
use gps_rcv::errors::Error;
use gps_rcv::event::{event_channel, Event, TimedEvent};
use gps_rcv::receiver::Receiver;
use gps_rcv::recording::IQRecording;

#[derive(StructOpt, Debug)]
#[structopt(name = "gps-rcv", about = "software-defined GPS L1 C/A receiver")]
struct Options {
    /// IQ recording to process
    #[structopt(long)]
    file: PathBuf,
    /// Interleaved sample layout: int8_iq, uint8_iq or float32_iq
    #[structopt(long, default_value = "int8_iq")]
    format: SampleFormat,
    /// Sample rate of the recording in Hz
    #[structopt(long, default_value = "2046000")]
    sample_rate: f64,
    /// Stop after this many seconds of samples
    #[structopt(long)]
    duration: Option<f64>,
    /// Write the collected ephemerides to this JSON file on exit
    #[structopt(long)]
    ephemeris_out: Option<PathBuf>,
    /// Maximum number of simultaneously tracked SVs
    #[structopt(long, default_value = "10")]
    max_svs: usize,
}

fn print_event(ev: &TimedEvent) {
    match &ev.event {
        Event::Fix(fix) => {
            println!(
                "{} t={:8.3} x={:+.1} y={:+.1} z={:+.1} b={:+.1}m hdop={:.2} svs={}",
                "FIX".green().bold(),
                ev.ts_sec,
                fix.x,
                fix.y,
                fix.z,
                fix.clock_bias_m,
                fix.hdop,
                fix.num_svs
            );
        }
        Event::Acquired {
            sv,
            doppler_hz,
            peak_ratio,
            ..
        } => {
            println!(
                "{} t={:8.3} {} dopp={:+5.0} ratio={:.2}",
                "ACQ".yellow(),
                ev.ts_sec,
                sv,
                doppler_hz,
                peak_ratio
            );
        }
        Event::Locked { sv, cn0 } => {
            println!("{} t={:8.3} {} cn0={:.1}", "LCK".green(), ev.ts_sec, sv, cn0);
        }
        Event::EphemerisReady { sv, iode } => {
            println!("{} t={:8.3} {} iode={}", "EPH".cyan(), ev.ts_sec, sv, iode);
        }
        other => {
            log::debug!("event t={:.3} {:?}", ev.ts_sec, other);
        }
    }
}

fn run(opt: Options) -> Result<(), Error> {
    let cfg = Config {
        sample_rate_hz: opt.sample_rate,
        sample_format: opt.format,
        max_concurrent_tracked_svs: opt.max_svs,
        ..Config::default()
    };
    cfg.validate()?;

    let recording = IQRecording::open(&opt.file, opt.format)?;
    let (sink, rx) = event_channel();
    // the event consumer is the one subscriber; the dashboard would sit here
    let printer = thread::spawn(move || {
        for ev in rx.iter() {
            print_event(&ev);
        }
    });

    let mut receiver = Receiver::new(cfg, recording, sink)?;
    let result = receiver.run(opt.duration);

    if let Some(path) = &opt.ephemeris_out {
        dump_ephemerides(path, receiver.ephemerides())?;
        log::info!("ephemerides written to {}", path.display());
    }
    if let Some(fix) = receiver.latest_fix() {
        log::info!(
            "final fix: x={:.1} y={:.1} z={:.1} after {} solutions",
            fix.x,
            fix.y,
            fix.z,
            receiver.num_fixes()
        );
    }

    drop(receiver);
    let _ = printer.join();
    result
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opt = Options::from_args();
    match run(opt) {
        Ok(()) => {}
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(e.exit_code());
        }
    }
}
