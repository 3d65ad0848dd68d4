use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::mpsc::{channel, Receiver};
use std::sync::Arc;

use digiframe::cache::ImageCache;
use digiframe::cli::{FrameCommand, FrameOpts};
use digiframe::client::{spawn_discovery, ClientOptions, FrameClient, FrameEvent};
use digiframe::config::{default_config_path, load_config, save_config, ClientConfig};
use digiframe::discovery::DiscoveryConfig;
use digiframe::logger::{Logger, NoopLogger, TextLogger};
use digiframe::url::{parse_frame_addr, FrameAddr};

fn main() -> Result<()> {
    let opts = FrameOpts::parse();
    let config_path = opts.config.clone().unwrap_or_else(default_config_path);
    let mut cfg = load_config(&config_path)?;

    let logger: Arc<dyn Logger> = match &opts.log_file {
        Some(path) => Arc::new(
            TextLogger::new(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?
                .with_tag(opts.command.name()),
        ),
        None => Arc::new(NoopLogger),
    };

    // Network work runs on the runtime; this thread only consumes events
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    match &opts.command {
        FrameCommand::Discover { timeout_ms } => {
            let mut dc = cfg.discovery();
            if let Some(ms) = timeout_ms {
                dc.timeout_ms = *ms;
            }
            let address = discover(&rt, dc, &logger, opts.verbose)?;
            println!("{}", address);
            remember(&config_path, &mut cfg, &address)?;
        }
        FrameCommand::List => {
            let (client, rx) = connect(&opts, &rt, &config_path, &mut cfg, logger)?;
            client.request_all();
            let ids = wait_for(&rx, opts.verbose, |ev| match ev {
                FrameEvent::ListingComplete(ids) => Some(ids.clone()),
                _ => None,
            })?;
            for id in &ids {
                println!("{}", id);
            }
            if opts.verbose {
                let uncached = client.cache().missing(&ids).len();
                eprintln!("{} image(s), {} not cached locally", ids.len(), uncached);
            }
            hang_up(&client, &rx, opts.verbose);
        }
        FrameCommand::Send { file } => {
            let image = std::fs::read(file)
                .with_context(|| format!("Failed to read image: {}", file.display()))?;
            let (client, rx) = connect(&opts, &rt, &config_path, &mut cfg, logger)?;
            client.send_image(image);
            let id = wait_for(&rx, opts.verbose, |ev| match ev {
                FrameEvent::TransferComplete(id) => Some(id.clone()),
                _ => None,
            })?;
            println!("{}", id);
            hang_up(&client, &rx, opts.verbose);
        }
        FrameCommand::Delete { id } => {
            let (client, rx) = connect(&opts, &rt, &config_path, &mut cfg, logger)?;
            client.delete(id);
            // Queued after the delete, so the request is on the wire first
            client.close();
            wait_for(&rx, opts.verbose, |ev| matches!(ev, FrameEvent::Closed).then_some(()))?;
            println!("Deleted {}", id);
        }
    }
    Ok(())
}

/// Resolve the address, start the connection task and wait for `Connected`.
fn connect(
    opts: &FrameOpts,
    rt: &tokio::runtime::Runtime,
    config_path: &Path,
    cfg: &mut ClientConfig,
    logger: Arc<dyn Logger>,
) -> Result<(FrameClient, Receiver<FrameEvent>)> {
    let addr = resolve_address(opts, rt, config_path, cfg, &logger)?;
    if opts.verbose {
        eprintln!("Connecting to {}", addr);
    }
    let (tx, rx) = channel();
    let client = FrameClient::spawn(
        rt.handle(),
        addr.clone(),
        ClientOptions {
            connect_timeout_ms: cfg.connect_timeout_ms,
            cache: ImageCache::new(),
            logger,
        },
        tx,
    );
    wait_for(&rx, opts.verbose, |ev| matches!(ev, FrameEvent::Connected).then_some(()))
        .with_context(|| format!("Photo frame at {} is unavailable", addr))?;
    Ok((client, rx))
}

fn hang_up(client: &FrameClient, rx: &Receiver<FrameEvent>, verbose: bool) {
    client.close();
    let _ = wait_for(rx, verbose, |ev| matches!(ev, FrameEvent::Closed).then_some(()));
}

/// `--address`, then the saved address, then discovery (saving the result).
fn resolve_address(
    opts: &FrameOpts,
    rt: &tokio::runtime::Runtime,
    config_path: &Path,
    cfg: &mut ClientConfig,
    logger: &Arc<dyn Logger>,
) -> Result<FrameAddr> {
    let raw = match (&opts.address, &cfg.last_address) {
        (Some(a), _) => a.clone(),
        (None, Some(saved)) => saved.clone(),
        (None, None) => {
            if opts.verbose {
                eprintln!("No saved address, searching the local network");
            }
            let found = discover(rt, cfg.discovery(), logger, opts.verbose)?;
            remember(config_path, cfg, &found)?;
            found
        }
    };
    parse_frame_addr(&raw, cfg.port).with_context(|| format!("Invalid frame address: {}", raw))
}

fn discover(
    rt: &tokio::runtime::Runtime,
    dc: DiscoveryConfig,
    logger: &Arc<dyn Logger>,
    verbose: bool,
) -> Result<String> {
    let timeout_ms = dc.timeout_ms;
    let (tx, rx) = channel();
    spawn_discovery(rt.handle(), dc, Arc::clone(logger), tx);
    wait_for(&rx, verbose, |ev| match ev {
        FrameEvent::Discovered(address) => Some(address.clone()),
        _ => None,
    })
    .with_context(|| format!("No photo frame answered within {} ms", timeout_ms))
}

fn remember(config_path: &Path, cfg: &mut ClientConfig, address: &str) -> Result<()> {
    cfg.last_address = Some(address.to_string());
    save_config(config_path, cfg)
}

/// Block on the event channel until `pick` accepts an event. Terminal events
/// that `pick` does not accept become errors.
fn wait_for<T>(
    rx: &Receiver<FrameEvent>,
    verbose: bool,
    mut pick: impl FnMut(&FrameEvent) -> Option<T>,
) -> Result<T> {
    loop {
        let ev = rx.recv().context("Background task ended without a result")?;
        if verbose {
            eprintln!("event: {:?}", ev);
        }
        if let Some(v) = pick(&ev) {
            return Ok(v);
        }
        match ev {
            FrameEvent::TimedOut => bail!("Timed out"),
            FrameEvent::ConnectFailed(msg) => bail!("Connection failed: {}", msg),
            FrameEvent::Closed => bail!("Connection closed by the photo frame"),
            FrameEvent::ProtocolFault { kind, message } => {
                bail!("Protocol fault ({:?}): {}", kind, message)
            }
            _ => {}
        }
    }
}
