/// Train a window-based POS/NER tagger on `word<TAB>label` corpora
///
/// Usage: train_tagger <train-file> <dev-file> [training-config.json]
use anyhow::Context;
use tiny_tagger::data::corpus::read_tagged_file;
use tiny_tagger::data::{TokenMapper, UnknownPolicy, WindowDataset};
use tiny_tagger::models::loader::load_window_tagger;
use tiny_tagger::models::WindowTagger;
use tiny_tagger::training::{ArgmaxPredictor, CrossEntropyLoss, Trainer, TrainingConfig};
use tiny_tagger::WindowTaggerConfig;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stdout)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        anyhow::bail!("usage: {} <train-file> <dev-file> [training-config.json]", args[0]);
    }
    let (train_path, dev_path) = (&args[1], &args[2]);

    let training_config = match args.get(3) {
        Some(path) => TrainingConfig::from_json_file(path)
            .with_context(|| format!("reading training config {}", path))?,
        None => TrainingConfig::default(),
    };
    log::info!("Training configuration: {:#?}", training_config);

    let mut mapper = TokenMapper::new(1, '\t', UnknownPolicy::Categories);
    mapper.create_mapping(train_path)?;
    log::info!(
        "Vocabulary: {} tokens, {} labels",
        mapper.tokens_dim(),
        mapper.labels_dim()
    );

    let model_config = WindowTaggerConfig {
        vocab_size: mapper.tokens_dim(),
        num_labels: mapper.labels_dim(),
        ..WindowTaggerConfig::default()
    };

    let train_sentences = read_tagged_file(train_path, '\t')?;
    let dev_sentences = read_tagged_file(dev_path, '\t')?;
    let train = WindowDataset::new(&train_sentences, &mapper, model_config.half_window)?;
    let dev = WindowDataset::new(&dev_sentences, &mapper, model_config.half_window)?;

    let device = training_config.resolve_device()?;
    let model = WindowTagger::new(model_config, &device)?.with_metadata(mapper.to_json()?);

    let mut trainer = Trainer::new(
        model,
        training_config,
        ArgmaxPredictor::new(),
        CrossEntropyLoss::new(),
    )?;
    let summary = trainer.train("window_tagger", &train, &dev)?;

    for stats in &summary.epochs {
        println!(
            "epoch {:>3}  train loss {:.4}  dev loss {:.4}  dev acc {:.4}{}",
            stats.epoch,
            stats.train_loss,
            stats.dev.loss,
            stats.dev.accuracy,
            if stats.checkpoint.is_some() { "  *" } else { "" }
        );
    }

    if let Some((epoch, path)) = summary.checkpoints().last() {
        let restored = load_window_tagger(path, &device)?;
        log::info!(
            "Best model from epoch {} restored ({} labels)",
            epoch,
            restored.config().num_labels
        );
    }

    Ok(())
}
