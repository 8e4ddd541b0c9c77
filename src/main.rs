mod cli;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use vf_av::{DecoderLauncher, FfprobeProber, FrameSource, Prober, ToolRegistry};
use vidframe::{shutdown, CancelScope, Config};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load_or_default(cli.config.as_deref());
    if cli.verbose {
        config.logging.level = "vidframe=debug,vf_av=debug,vf_core=debug".to_string();
    }
    vidframe::logging::init(&config.logging);

    match cli.command {
        Commands::Probe { file, json } => probe_file(&file, json, &config),
        Commands::Frames {
            file,
            output,
            limit,
        } => dump_frames(&file, output.as_deref(), limit, &config),
        Commands::CheckTools => check_tools(&config),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("vidframe {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn probe_file(file: &Path, json: bool, config: &Config) -> Result<()> {
    let tools = ToolRegistry::discover(&config.tools);
    let meta = &FfprobeProber::new(tools, &config.decoder).probe(file)?;

    if json {
        println!("{}", serde_json::to_string_pretty(meta)?);
        return Ok(());
    }

    println!("File: {}", meta.path().display());
    println!("Video: {} {}x{}", meta.codec(), meta.width(), meta.height());
    println!("  {:.3} fps, {} frames", meta.fps(), meta.frames());
    let secs = meta.duration() as u64;
    println!(
        "  Duration: {:02}:{:02}:{:02}",
        secs / 3600,
        (secs / 60) % 60,
        secs % 60
    );
    println!("  Bitrate: {} b/s", meta.bitrate());
    println!("  Frame size: {} bytes", meta.frame_size());
    match meta.audio_codec() {
        Some(codec) => println!("Audio: {codec}"),
        None => println!("Audio: none"),
    }

    Ok(())
}

fn dump_frames(file: &Path, output: Option<&Path>, limit: Option<u64>, config: &Config) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    let scope = CancelScope::new(rt.handle().clone());
    let listener = rt.spawn(shutdown::listen(scope.clone()));

    let streamed = vf_av::open_video(file, config, scope.clone())
        .map_err(anyhow::Error::from)
        .and_then(|mut source| {
            let count = stream_frames(&mut source, output, limit)?;
            Ok((count, source.frame_size()))
        });

    // The listener is drained on every path, including a failed stream.
    let interrupted = scope.is_cancelled();
    scope.cancel();
    rt.block_on(listener)?;

    let (count, frame_size) = streamed?;
    println!(
        "{count} frames of {frame_size} bytes{}",
        if interrupted { " (interrupted)" } else { "" }
    );
    Ok(())
}

/// Pull frames into the optional output file. The file is flushed before
/// any stream error is returned.
fn stream_frames<L: DecoderLauncher>(
    source: &mut FrameSource<L>,
    output: Option<&Path>,
    limit: Option<u64>,
) -> Result<u64> {
    let mut sink = output
        .map(|p| {
            File::create(p)
                .map(BufWriter::new)
                .with_context(|| format!("Failed to create {}", p.display()))
        })
        .transpose()?;

    let mut count = 0u64;
    let pulled = loop {
        if limit.is_some_and(|l| count >= l) {
            break Ok(());
        }
        match source.try_next_frame() {
            Ok(true) => {}
            Ok(false) => break Ok(()),
            Err(e) => break Err(e),
        }
        if let Some(sink) = sink.as_mut() {
            sink.write_all(source.frame())?;
        }
        count += 1;
    };

    if let Some(mut sink) = sink {
        sink.flush().context("Failed to flush frame output")?;
    }
    pulled.with_context(|| format!("Stream failed after {count} frames"))?;
    Ok(count)
}

fn check_tools(config: &Config) -> Result<()> {
    println!("Checking external tools...\n");

    let tools = vf_av::ToolRegistry::discover(&config.tools).check_all();
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version);
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
        Ok(())
    } else {
        anyhow::bail!("ffmpeg and ffprobe are both required")
    }
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {}", p.display());
            let contents = std::fs::read_to_string(p)
                .with_context(|| format!("Failed to read {}", p.display()))?;
            Config::from_json(&contents)?
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    let warnings = config.validate();
    if warnings.is_empty() {
        println!("✓ Configuration is valid");
    } else {
        for warning in &warnings {
            println!("! {warning}");
        }
    }
    println!("  Close grace: {:?}", config.decoder.close_grace());
    println!("  Probe timeout: {:?}", config.decoder.probe_timeout());
    println!("  Log level: {}", config.logging.level);

    Ok(())
}
