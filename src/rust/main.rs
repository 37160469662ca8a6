use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use symptom_classifier::{
    select_device, server, train_from_csv, DiseaseVocabulary, InferenceEngine, ModelManager, PretrainedEncoder,
    TrainingConfig, DEFAULT_PRETRAINED_MODEL,
};

#[derive(Parser)]
#[command(author, version, about = "Disease classification from symptom descriptions", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fine-tune the classifier on a labelled CSV file
    Train {
        /// CSV with `text` and `label` columns
        #[arg(long)]
        data: PathBuf,
        /// Directory the trained model is written to
        #[arg(long)]
        out: PathBuf,
        /// Hub repository id or local directory of the pretrained encoder
        #[arg(long, default_value = DEFAULT_PRETRAINED_MODEL)]
        pretrained: String,
        /// Disease list, one per line (defaults to the built-in 24 diseases)
        #[arg(long)]
        labels: Option<PathBuf>,
        #[arg(long)]
        epochs: Option<usize>,
        #[arg(long)]
        batch_size: Option<usize>,
        #[arg(long)]
        learning_rate: Option<f64>,
        /// Skip accelerator probing
        #[arg(long)]
        cpu: bool,
    },
    /// Print the most likely diseases for a symptom description
    Predict {
        #[arg(long)]
        model_dir: PathBuf,
        #[arg(long)]
        prompt: String,
        #[arg(long, default_value_t = 3)]
        k: usize,
        #[arg(long)]
        cpu: bool,
    },
    /// Download a pretrained encoder into the local cache
    Download {
        #[arg(long, default_value = DEFAULT_PRETRAINED_MODEL)]
        pretrained: String,
        /// Force a fresh download of the model files
        #[arg(short, long)]
        fresh: bool,
    },
    /// Serve the classifier over HTTP
    Serve {
        #[arg(long)]
        model_dir: PathBuf,
        #[arg(long, default_value = "127.0.0.1:8000")]
        addr: SocketAddr,
        #[arg(long)]
        cpu: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    match args.command {
        Command::Train {
            data,
            out,
            pretrained,
            labels,
            epochs,
            batch_size,
            learning_rate,
            cpu,
        } => {
            let mut config = TrainingConfig::default();
            if let Some(epochs) = epochs {
                config.num_epochs = epochs;
            }
            if let Some(batch_size) = batch_size {
                config.batch_size = batch_size;
            }
            if let Some(learning_rate) = learning_rate {
                config.learning_rate = learning_rate;
            }
            run_train(data, out, &pretrained, labels, config, cpu).await
        }
        Command::Predict {
            model_dir,
            prompt,
            k,
            cpu,
        } => run_predict(model_dir, &prompt, k, cpu),
        Command::Download { pretrained, fresh } => run_download(&pretrained, fresh).await,
        Command::Serve { model_dir, addr, cpu } => run_serve(model_dir, addr, cpu).await,
    }
}

async fn run_train(
    data: PathBuf,
    out: PathBuf,
    pretrained: &str,
    labels: Option<PathBuf>,
    config: TrainingConfig,
    cpu: bool,
) -> Result<()> {
    let manager = ModelManager::new_default().context("creating model cache")?;
    let encoder_dir = manager
        .resolve(pretrained)
        .await
        .with_context(|| format!("fetching pretrained encoder {}", pretrained))?;

    let vocabulary = match labels {
        Some(path) => {
            DiseaseVocabulary::from_file(&path).with_context(|| format!("reading disease list {:?}", path))?
        }
        None => DiseaseVocabulary::default(),
    };

    let start = Instant::now();
    let report = tokio::task::spawn_blocking(move || -> Result<_> {
        let encoder = PretrainedEncoder::from_dir(&encoder_dir)
            .with_context(|| format!("loading encoder from {:?}", encoder_dir))?;
        let device = select_device(cpu);
        train_from_csv(&data, &encoder, &vocabulary, config, &out, device)
            .with_context(|| format!("training on {:?}", data))
    })
    .await
    .context("training task panicked")??;

    for epoch in &report.history {
        info!(
            "epoch {}: train_loss={:.4} eval_loss={:.4} f1_macro={:.4}",
            epoch.epoch, epoch.train_loss, epoch.eval_loss, epoch.eval_f1_macro
        );
    }
    println!(
        "Trained on {} examples ({} held out) in {:.2?}",
        report.train_examples,
        report.eval_examples,
        start.elapsed()
    );
    println!("Model saved to {:?}", report.artifact_dir());
    Ok(())
}

fn run_predict(model_dir: PathBuf, prompt: &str, k: usize, cpu: bool) -> Result<()> {
    let engine = InferenceEngine::builder()
        .force_cpu(cpu)
        .with_model_dir(&model_dir)
        .with_context(|| format!("opening model directory {:?}", model_dir))?
        .build()
        .context("loading classifier")?;

    let predictions = engine.predict_top_k(prompt, k).context("running prediction")?;
    for prediction in predictions {
        println!("{} ({:.1}%)", prediction.label, prediction.probability * 100.0);
    }
    Ok(())
}

async fn run_download(pretrained: &str, fresh: bool) -> Result<()> {
    let manager = ModelManager::new_default().context("creating model cache")?;

    if fresh {
        info!("Fresh download requested - removing any existing model files...");
        manager.remove_download(pretrained)?;
    }

    let dir = manager
        .ensure_model_downloaded(pretrained)
        .await
        .with_context(|| format!("downloading {}", pretrained))?;
    if !manager.verify_model(pretrained)? {
        bail!("downloaded files for {} failed verification", pretrained);
    }
    println!("{} cached at {:?}", pretrained, dir);
    Ok(())
}

async fn run_serve(model_dir: PathBuf, addr: SocketAddr, cpu: bool) -> Result<()> {
    let engine = tokio::task::spawn_blocking(move || {
        InferenceEngine::builder()
            .force_cpu(cpu)
            .with_model_dir(&model_dir)?
            .build()
    })
    .await
    .context("model loading task panicked")?
    .context("loading classifier")?;

    info!("Loaded classifier: {:?}", engine.info());
    server::serve(Arc::new(engine), addr)
        .await
        .with_context(|| format!("serving on {}", addr))
}
