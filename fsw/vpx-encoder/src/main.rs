use clap::Parser;
use frame_shm::ShmBuffer;
use miette::IntoDiagnostic;
use tracing::info;
use tracing_subscriber::EnvFilter;
use vpx_encoder::{
    AttachError, Config, Error,
    cli::Args,
    codec::{DefaultEngine, Encoder},
    frame::i420_len,
    pipeline::FrameLoop,
    publish::UdpPublisher,
};

fn main() -> miette::Result<()> {
    let _ = tracing_subscriber::fmt::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive("info".parse().into_diagnostic()?)
                .from_env_lossy(),
        )
        .try_init();

    let args = Args::parse();
    let config = Config::resolve(&args.options()?)?;
    run(&config)?;
    Ok(())
}

fn run(config: &Config) -> Result<(), Error> {
    let name = &config.buffer_name;
    let buffer = ShmBuffer::attach(name).map_err(|source| AttachError::Shm {
        name: name.clone(),
        source,
    })?;
    let needed = i420_len(config.width, config.height);
    if buffer.len() < needed {
        return Err(AttachError::Geometry {
            name: name.clone(),
            len: buffer.len(),
            width: config.width,
            height: config.height,
            needed,
        }
        .into());
    }
    info!("attached to '{}' ({} bytes)", name, buffer.len());

    let encoder = Encoder::<DefaultEngine>::open(config)?;
    info!(
        codec = %config.codec,
        engine = encoder.name(),
        width = config.width,
        height = config.height,
        bitrate = config.rate.target_bitrate,
        gop = encoder.gop(),
        "encoder ready"
    );

    let publisher = UdpPublisher::connect(config.endpoint)?;
    info!(cid = config.endpoint, target = %publisher.target(), "publishing image readings");

    let mut frame_loop = FrameLoop::new(config, buffer, encoder, publisher);
    let shutdown = frame_loop.run()?;
    let stats = frame_loop.stats();
    info!(
        ?shutdown,
        published = stats.published,
        skipped = stats.skipped,
        "encoder stopped"
    );
    Ok(())
}
