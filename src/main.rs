use camtalk::{
    adpcm::ImaAdpcmEncoder,
    audio_source::WavSource,
    config::Credentials,
    error::Result as TalkResult,
    streamer::{AudioStreamer, StreamerConfig},
};
use clap::Parser;
use log::{error, info};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;
use talk_protocol::{ControlSession, DataSession, SessionConfig};

#[derive(Parser, Debug)]
#[command(name = "camtalk")]
#[command(about = "Play a WAV file through the speaker of a MO_O/MO_V network camera")]
struct Args {
    /// Camera IP address
    ip: IpAddr,

    /// Camera media port
    port: u16,

    /// 16-bit PCM WAV file, ideally 8kHz mono
    audio_file: PathBuf,

    /// Playback buffer requested from the camera (seconds)
    #[arg(long, default_value = "1", value_parser = clap::value_parser!(u8).range(1..))]
    buffer_secs: u8,

    /// Pause before each audio frame (milliseconds)
    #[arg(long, default_value = "20")]
    pacing_ms: u64,

    /// Wait after the last audio frame (milliseconds)
    #[arg(long, default_value = "1000")]
    settle_ms: u64,

    /// Give up on a silent camera after this many seconds (default: wait forever)
    #[arg(long)]
    read_timeout_secs: Option<u64>,

    /// Connect timeout in seconds
    #[arg(long)]
    connect_timeout_secs: Option<u64>,
}

fn run(args: Args) -> TalkResult<()> {
    let credentials = Credentials::load()?;

    let session_config = SessionConfig {
        read_timeout: args.read_timeout_secs.map(Duration::from_secs),
        write_timeout: None,
        connect_timeout: args.connect_timeout_secs.map(Duration::from_secs),
        buffer_secs: args.buffer_secs,
    };
    let streamer_config = StreamerConfig {
        pacing: Duration::from_millis(args.pacing_ms),
        settle: Duration::from_millis(args.settle_ms),
    };

    // Open the file before talking to the camera so a bad path fails fast
    let source = WavSource::open(&args.audio_file)?;

    let mut control = ControlSession::connect((args.ip, args.port), session_config.clone())?;
    let grant = control.login(credentials.user(), credentials.password())?;
    println!(
        "✅ Talk session established, data connection id {}",
        grant.data_connection_id
    );

    let data = DataSession::open(
        control.remote_addr(),
        grant.data_connection_id,
        &session_config,
    )?;

    let handle = AudioStreamer::new(source, ImaAdpcmEncoder, streamer_config).spawn(data)?;
    let report = handle.join()?;

    info!(
        "🏁 Done: {} frames, {} bytes of audio",
        report.batches_sent, report.bytes_sent
    );
    Ok(())
}

fn main() {
    // Initialize logging
    env_logger::init();

    let args = Args::parse();
    info!("🚀 Starting camtalk with args: {:?}", args);

    if let Err(e) = run(args) {
        error!("{}", e);
        eprintln!("❌ {}", e);
        std::process::exit(1);
    }
}
