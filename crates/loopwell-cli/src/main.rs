//! loopwell CLI — looping multi-part player powered by the loopwell engine.
//!
//! Commands:
//!   loopwell play <track.json> [--from <s>] [--no-repeat]
//!                                  Play a track descriptor
//!   loopwell play-files <file>... [--loop-start <s>] [--loop-end <s>] [--no-repeat]
//!                                  Play audio files laid end to end
//!   loopwell inspect <track.json|file>...
//!                                  Print validated descriptors as JSON
//!
//! `--headless` (anywhere) schedules everything without opening a device.

mod files;

use std::path::Path;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;

use loopwell_core::effects::fetch::{FileFetcher, SourceFetcher};
use loopwell_core::{Engine, EngineConfig, PlayerEvent, TrackDescriptor};

fn main() {
    env_logger::init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let headless = take_flag(&mut args, "--headless");
    if args.is_empty() {
        print_usage();
        return;
    }

    match args[0].as_str() {
        "play" => cmd_play(&args[1..], headless),
        "play-files" => cmd_play_files(&args[1..], headless),
        "inspect" => cmd_inspect(&args[1..]),
        "help" | "--help" | "-h" => print_usage(),
        other => {
            eprintln!("unknown command: {}", other);
            print_usage();
        }
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_play(args: &[String], headless: bool) {
    let mut args = args.to_vec();
    let repeat = !take_flag(&mut args, "--no-repeat");
    let from = match take_seconds(&mut args, "--from") {
        Ok(v) => v,
        Err(e) => return eprintln!("{}", e),
    };
    let Some(file) = args.first() else {
        eprintln!("usage: loopwell play <track.json> [--from <s>] [--no-repeat]");
        return;
    };

    let track = match load_descriptor(file) {
        Ok(t) => t,
        Err(e) => return eprintln!("{}", e),
    };
    // Relative part locators resolve against the descriptor's directory.
    let root = Path::new(file)
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();

    run(track, FileFetcher::with_root(root), repeat, from, headless);
}

fn cmd_play_files(args: &[String], headless: bool) {
    let mut args = args.to_vec();
    let repeat = !take_flag(&mut args, "--no-repeat");
    let bounds = take_seconds(&mut args, "--loop-start")
        .and_then(|start| take_seconds(&mut args, "--loop-end").map(|end| (start, end)));
    let (loop_start, loop_end) = match bounds {
        Ok(b) => b,
        Err(e) => return eprintln!("{}", e),
    };
    if args.is_empty() {
        eprintln!("usage: loopwell play-files <file>... [--loop-start <s>] [--loop-end <s>]");
        return;
    }

    match files::track_from_files(&args, loop_start, loop_end) {
        Ok(track) => run(track, FileFetcher::new(), repeat, None, headless),
        Err(e) => eprintln!("{}", e),
    }
}

fn cmd_inspect(args: &[String]) {
    if args.is_empty() {
        eprintln!("usage: loopwell inspect <track.json|file>...");
        return;
    }
    for arg in args {
        let track = if arg.ends_with(".json") {
            load_descriptor(arg)
        } else {
            files::track_from_files(std::slice::from_ref(arg), None, None)
        };
        match track {
            Ok(t) => println!("{}", serde_json::to_string_pretty(&t).unwrap_or_default()),
            Err(e) => eprintln!("{}", e),
        }
    }
}

// ---------------------------------------------------------------------------
// Playback
// ---------------------------------------------------------------------------

fn run(track: TrackDescriptor, files: FileFetcher, repeat: bool, from: Option<f64>, headless: bool) {
    let config = EngineConfig {
        repeat,
        ..EngineConfig::default()
    };
    let fetcher = Arc::new(SourceFetcher::new(files));
    let built = if headless {
        Engine::headless(fetcher, config)
    } else {
        Engine::native(fetcher, config)
    };
    let engine = match built {
        Ok(e) => e,
        Err(e) => {
            eprintln!("failed to open audio output: {} (try --headless)", e);
            return;
        }
    };

    let title = track.title.clone().unwrap_or_else(|| track.id.clone());
    let events = engine.subscribe();
    if let Err(e) = engine.set_track(Some(Arc::new(track))) {
        eprintln!("{}", e);
        return;
    }
    if let Some(seconds) = from {
        engine.seek(seconds);
    }

    engine.start();
    println!("loading {} ...", title);
    if let Err(e) = engine.play() {
        eprintln!("playback failed: {}", e);
        engine.shutdown();
        return;
    }

    // Block showing progress until the track ends (Ctrl+C exits)
    loop {
        std::thread::sleep(Duration::from_millis(250));
        let snap = engine.snapshot();
        print_progress(&title, snap.position, snap.duration, snap.repeat);
        if drain_events(&events) {
            break;
        }
    }
    println!();
    engine.shutdown();
}

/// True once the track has ended.
fn drain_events(events: &Receiver<PlayerEvent>) -> bool {
    let mut ended = false;
    for event in events.try_iter() {
        match event {
            PlayerEvent::TrackEnded { .. } => ended = true,
            PlayerEvent::LoadFailed { error, .. } => {
                eprintln!("\nload failed: {}", error);
                ended = true;
            }
            PlayerEvent::Looped { .. } => log::debug!("loopwell: looped"),
            PlayerEvent::StateChanged { .. } => {}
        }
    }
    ended
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn load_descriptor(file: &str) -> Result<TrackDescriptor, String> {
    let json = std::fs::read_to_string(file).map_err(|e| format!("{}: {}", file, e))?;
    TrackDescriptor::from_json(&json).map_err(|e| format!("{}: {}", file, e))
}

/// Remove `flag` from `args`, returning whether it was present.
fn take_flag(args: &mut Vec<String>, flag: &str) -> bool {
    let before = args.len();
    args.retain(|a| a != flag);
    args.len() != before
}

/// Remove `flag <seconds>` from `args`.
fn take_seconds(args: &mut Vec<String>, flag: &str) -> Result<Option<f64>, String> {
    let Some(i) = args.iter().position(|a| a == flag) else {
        return Ok(None);
    };
    let value = args
        .get(i + 1)
        .ok_or_else(|| format!("{} needs a value in seconds", flag))?;
    let seconds = value
        .parse::<f64>()
        .map_err(|_| format!("invalid seconds for {}: {}", flag, value))?;
    args.drain(i..=i + 1);
    Ok(Some(seconds))
}

fn print_progress(title: &str, pos: f64, dur: f64, repeat: bool) {
    let bar_width = 30;
    let filled = if dur > 0.0 {
        (((pos / dur) * bar_width as f64) as usize).min(bar_width)
    } else {
        0
    };
    let empty = bar_width - filled;

    print!(
        "\r  {}  [{}{}] {} / {}  repeat: {}    ",
        title,
        "=".repeat(filled),
        " ".repeat(empty),
        fmt_time(pos),
        fmt_time(dur),
        if repeat { "on" } else { "off" },
    );
    use std::io::Write;
    std::io::stdout().flush().ok();
}

fn fmt_time(seconds: f64) -> String {
    let secs = seconds.max(0.0) as u64;
    format!("{}:{:02}", secs / 60, secs % 60)
}

fn print_usage() {
    println!("loopwell - looping multi-part player");
    println!();
    println!("usage: loopwell [--headless] <command> [args]");
    println!();
    println!("commands:");
    println!("  play <track.json> [--from <s>] [--no-repeat]");
    println!("                         Play a track descriptor");
    println!("  play-files <file>... [--loop-start <s>] [--loop-end <s>] [--no-repeat]");
    println!("                         Play audio files laid end to end");
    println!("  inspect <track.json|file>...");
    println!("                         Print validated descriptors as JSON");
}
