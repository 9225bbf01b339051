// console/src/main.rs
use anyhow::{Context, Result};
use clap::Parser;
use digit_net::config::MNIST_IMAGE_SIDE;
use digit_net::{
    format_confusion, load_mnist, print_model_summary, render_input, summarize_series,
    Monitor, Network, NetworkConfig, Snapshot, Trainer,
};
use log::info;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

/// Train the digit classifier in the background and poll it like a dashboard.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Directory holding the MNIST IDX files (optionally gzipped).
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// JSON network configuration; defaults are used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Wall-clock training time.
    #[arg(long, default_value_t = 30)]
    seconds: u64,

    /// Dashboard refresh period.
    #[arg(long, default_value_t = 1000)]
    poll_ms: u64,

    #[arg(long)]
    seed: Option<u64>,

    /// Only use the first N training samples.
    #[arg(long)]
    train_limit: Option<usize>,

    /// Test samples scored by the manual evaluations.
    #[arg(long, default_value_t = 1000)]
    test_samples: usize,

    /// Write the trained parameters here (gzipped JSON).
    #[arg(long)]
    save: Option<PathBuf>,
}

fn report(s: &Snapshot) {
    let fmt = |v: Option<f32>| v.map_or_else(|| "-".to_string(), |x| format!("{x:.4}"));
    info!(
        "[{}] epoch {} | {}/{} | loss {} | train acc {} | test acc {}",
        s.status,
        s.epoch + 1,
        s.position_in_epoch,
        s.dataset_len,
        fmt(s.mean_loss),
        fmt(s.train_accuracy),
        fmt(s.test_accuracy),
    );
}

/// Print the samples behind the most recent predictions.
fn show_recent(monitor: &Monitor, s: &Snapshot) {
    if s.dataset_len == 0 {
        return;
    }
    let first = s.position - s.recent_predictions.len();
    for (k, pred) in s.recent_predictions.iter().enumerate() {
        if let Some((input, label)) = monitor.train_sample((first + k) % s.dataset_len) {
            let image = render_input(&input, MNIST_IMAGE_SIDE);
            println!("label {label}, predicted {pred}\n{image}");
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => NetworkConfig::from_json_file(path)
            .with_context(|| format!("Loading config {}", path.display()))?,
        None => NetworkConfig::default(),
    };
    if args.seed.is_some() {
        config.seed = args.seed;
    }

    let mut train = load_mnist(&args.data_dir, true)?;
    if let Some(limit) = args.train_limit {
        train.truncate(limit);
    }
    let test = load_mnist(&args.data_dir, false)?;

    let mut network = Network::new(config)?;
    network.set_train_data(&train.images, &train.labels)?;
    network.set_test_data(&test.images, &test.labels)?;
    print_model_summary(&network);

    let trainer = Trainer::spawn(network)?;
    let monitor = trainer.monitor();
    trainer.start()?;

    let deadline = Instant::now() + Duration::from_secs(args.seconds);
    let halfway = Instant::now() + Duration::from_secs(args.seconds / 2);
    let mut checked_halfway = false;
    let mut polled_losses = Vec::new();
    while Instant::now() < deadline {
        thread::sleep(Duration::from_millis(args.poll_ms));
        let snapshot = monitor.snapshot(4);
        report(&snapshot);
        if let Some(loss) = snapshot.mean_loss {
            polled_losses.push(loss);
        }

        show_recent(&monitor, &snapshot);

        if !checked_halfway && Instant::now() >= halfway {
            checked_halfway = true;
            trainer.pause()?;
            let acc = trainer.evaluate(args.test_samples)?;
            info!("paused at sample {}: test accuracy {acc:.4}", monitor.position());
            println!("{}", format_confusion(&monitor.confusion_matrix()));
            trainer.resume()?;
        }
    }

    trainer.stop()?;
    let acc = trainer.evaluate(args.test_samples)?;
    info!("final test accuracy on {} samples: {acc:.4}", args.test_samples);
    println!("{}", format_confusion(&monitor.confusion_matrix()));
    report(&monitor.snapshot(0));

    let network = trainer.shutdown()?;
    if let Some(path) = &args.save {
        network.save_model(path)?;
    }
    print!("{}", summarize_series(&polled_losses, "polled mean loss"));
    Ok(())
}
