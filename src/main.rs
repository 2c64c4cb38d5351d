mod prompt;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use relabel_core::vision::{DEFAULT_ENDPOINT, DEFAULT_MODEL};
use relabel_core::{
    CancellationToken, CancelledError, CollisionPolicy, Mode, ProcessControl, ProcessOptions,
    VisionClient, VisionConfig, DEFAULT_SCALE,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "relabel", version, about = "Resize images, label them with a vision model and rename them by label")]
struct Cli {
    /// Directory with the source images (prompted for when omitted)
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// API key for the vision endpoint (prompted for when omitted)
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// "rename": label only; "tag": label plus tags embedded as metadata
    #[arg(short, long, value_enum, default_value_t = Mode::Rename)]
    mode: Mode,

    /// Scale factor applied to width and height
    #[arg(long, default_value_t = DEFAULT_SCALE)]
    scale: f64,

    /// Vision model name
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    /// Chat-completion endpoint URL
    #[arg(long, default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Collision handling on rename (default: suffix for rename mode, overwrite for tag mode)
    #[arg(long, value_enum)]
    on_collision: Option<CollisionPolicy>,

    /// Request timeout in seconds (default: wait indefinitely)
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Replace the built-in prompt
    #[arg(long)]
    prompt: Option<String>,

    /// Replace the mode's token budget
    #[arg(long)]
    max_tokens: Option<u32>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let Some(api_key) = cli
        .api_key
        .clone()
        .filter(|k| !k.trim().is_empty())
        .or_else(prompt::api_key)
    else {
        eprintln!("No API key provided.");
        std::process::exit(1);
    };

    let Some(dir) = cli.dir.clone().or_else(prompt::directory) else {
        eprintln!("No directory selected.");
        std::process::exit(1);
    };

    let mut vision = VisionConfig::with_model(cli.model)
        .endpoint(cli.endpoint)
        .timeout(cli.timeout_secs.map(Duration::from_secs));
    if let Some(p) = cli.prompt {
        vision = vision.prompt(p);
    }
    if let Some(n) = cli.max_tokens {
        vision = vision.max_tokens(n);
    }

    let options = ProcessOptions {
        dir,
        mode: cli.mode,
        scale: cli.scale,
        on_collision: cli.on_collision,
        vision,
    };
    if !(options.scale > 0.0 && options.scale <= 1.0) {
        anyhow::bail!("--scale must be in (0, 1], got {}", options.scale);
    }

    let token = CancellationToken::new();
    {
        let token = token.clone();
        ctrlc::set_handler(move || {
            if token.is_cancelled() {
                std::process::exit(130);
            }
            eprintln!("Stopping after the current file (Ctrl-C again to quit now)");
            token.cancel();
        })?;
    }
    let control = ProcessControl::new().with_cancel_token(token);

    let client = VisionClient::new(options.vision.clone(), api_key)?;
    let t_total = Instant::now();

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{bar:40}] {pos}/{len} {msg}")
            .unwrap(),
    );
    let pb_cb = pb.clone();
    let callback = move |stage: &str, current: u64, total: u64, message: &str| {
        pb_cb.set_length(total);
        pb_cb.set_position(current + 1);
        pb_cb.set_message(stage.to_string());
        pb_cb.suspend(|| eprintln!("{}", message));
    };

    let result = match relabel_core::process_with_control(&options, &client, &control, &callback) {
        Ok(result) => result,
        Err(e) if e.downcast_ref::<CancelledError>().is_some() => {
            pb.finish_and_clear();
            eprintln!("Cancelled.");
            std::process::exit(130);
        }
        Err(e) => {
            pb.finish_and_clear();
            return Err(e);
        }
    };
    pb.finish_and_clear();

    eprintln!(
        "Done! {} images found, {} resized, {} renamed, {} skipped ({:.2}s)",
        result.images_found,
        result.resized,
        result.renamed,
        result.skipped,
        t_total.elapsed().as_secs_f64()
    );

    Ok(())
}
