//! BTC regime analytics CLI
//!
//! Reads a JSON array of candles and prints the requested analysis as JSON.

use anyhow::Context;
use btc_regime_analytics::{
    analysis::analyze,
    config::Config,
    features::FeatureMatrix,
    indicators::{compute_indicators, KamaReading},
    regime::{ModelStore, RegimeClassifier, RegimeModel},
    risk::{returns_from_candles, RiskCalculator},
    signals::{aggregate, OnChainInputs},
    types::{validate_series, Candle, Interval},
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "btc-analytics")]
#[command(about = "Indicators, risk metrics, regime detection and composite signals for BTC candles")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Candle interval, overrides the config file
    #[arg(long, global = true)]
    interval: Option<Interval>,
}

#[derive(Subcommand)]
enum Commands {
    /// Technical indicator table
    Indicators {
        /// JSON candle file
        #[arg(short, long)]
        input: PathBuf,
    },
    /// VaR, ES, Sharpe, Sortino and drawdown
    Risk {
        #[arg(short, long)]
        input: PathBuf,

        /// Emit the rolling window series instead of one snapshot
        #[arg(long)]
        rolling: bool,
    },
    /// Regime report, fitting a model ahead of the holdout rows unless one is loaded
    Regime {
        #[arg(short, long)]
        input: PathBuf,

        /// Previously saved model
        #[arg(long)]
        model: Option<PathBuf>,

        /// Write the trained model here
        #[arg(long)]
        save_model: Option<PathBuf>,

        /// Training wall-clock limit in seconds
        #[arg(long, default_value = "120")]
        train_timeout: u64,
    },
    /// Composite trading signal for the latest candle
    Signal {
        #[arg(short, long)]
        input: PathBuf,

        #[command(flatten)]
        onchain: OnChainArgs,

        #[arg(long)]
        model: Option<PathBuf>,
    },
    /// Everything above in one report
    Analyze {
        #[arg(short, long)]
        input: PathBuf,

        #[command(flatten)]
        onchain: OnChainArgs,

        #[arg(long)]
        model: Option<PathBuf>,
    },
}

#[derive(clap::Args)]
struct OnChainArgs {
    /// Perpetual funding rate, as a fraction per funding period
    #[arg(long, allow_hyphen_values = true)]
    funding_rate: Option<f64>,

    /// Market capitalisation in USD
    #[arg(long)]
    market_cap: Option<f64>,
}

impl OnChainArgs {
    fn inputs(&self) -> OnChainInputs {
        OnChainInputs::new(self.funding_rate, self.market_cap)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)?;
    if let Some(interval) = cli.interval {
        config.interval = interval;
    }

    match cli.command {
        Commands::Indicators { input } => show_indicators(&config, &input).await,
        Commands::Risk { input, rolling } => show_risk(&config, &input, rolling).await,
        Commands::Regime {
            input,
            model,
            save_model,
            train_timeout,
        } => {
            show_regime(
                config,
                &input,
                model.as_deref(),
                save_model.as_deref(),
                Duration::from_secs(train_timeout),
            )
            .await
        }
        Commands::Signal {
            input,
            onchain,
            model,
        } => show_signal(&config, &input, &onchain, model.as_deref()).await,
        Commands::Analyze {
            input,
            onchain,
            model,
        } => show_analysis(&config, &input, &onchain, model.as_deref()).await,
    }
}

async fn read_candles(path: &Path) -> anyhow::Result<Vec<Candle>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading candles from {}", path.display()))?;
    let candles: Vec<Candle> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing candles in {}", path.display()))?;
    validate_series(&candles)?;
    tracing::info!(candles = candles.len(), path = %path.display(), "candles loaded");
    Ok(candles)
}

async fn read_model(path: &Path) -> anyhow::Result<RegimeModel> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading model from {}", path.display()))?;
    Ok(serde_json::from_str(&raw)?)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn show_indicators(config: &Config, input: &Path) -> anyhow::Result<()> {
    let candles = read_candles(input).await?;
    let rows = compute_indicators(&candles, &config.indicators)?;
    print_json(&rows)
}

async fn show_risk(config: &Config, input: &Path, rolling: bool) -> anyhow::Result<()> {
    let candles = read_candles(input).await?;
    let returns = returns_from_candles(&candles);
    let calculator = RiskCalculator::new(config.risk.clone()).with_interval(config.interval);

    if rolling {
        print_json(&calculator.rolling(&returns)?)
    } else {
        print_json(&calculator.compute(&returns)?)
    }
}

async fn show_regime(
    config: Config,
    input: &Path,
    model_path: Option<&Path>,
    save_path: Option<&Path>,
    train_timeout: Duration,
) -> anyhow::Result<()> {
    let candles = read_candles(input).await?;
    let classifier =
        RegimeClassifier::new(config.regime.clone()).with_features(config.features.clone());

    let model = match model_path {
        Some(path) => read_model(path).await?,
        None => {
            let features = FeatureMatrix::from_candles(&candles, classifier.feature_config())?;
            let store = ModelStore::new(config.regime.clone());
            let model = store
                .retrain(classifier.without_holdout(&features), train_timeout)
                .await?;
            (*model).clone()
        }
    };

    if let Some(path) = save_path {
        tokio::fs::write(path, serde_json::to_string_pretty(&model)?)
            .await
            .with_context(|| format!("writing model to {}", path.display()))?;
        tracing::info!(version = %model.version, path = %path.display(), "model saved");
    }

    let report = classifier.classify(&candles, &model)?;
    print_json(&report)
}

async fn show_signal(
    config: &Config,
    input: &Path,
    onchain: &OnChainArgs,
    model_path: Option<&Path>,
) -> anyhow::Result<()> {
    let candles = read_candles(input).await?;
    let classifier =
        RegimeClassifier::new(config.regime.clone()).with_features(config.features.clone());
    let features = FeatureMatrix::from_candles(&candles, classifier.feature_config())?;
    let model = match model_path {
        Some(path) => read_model(path).await?,
        None => classifier.train(&classifier.without_holdout(&features))?,
    };

    let current = model.predict(&features)?.pop();
    let kama = KamaReading::latest(&candles, &config.indicators.kama)?;

    let signal = aggregate(current.as_ref(), Some(&kama), &onchain.inputs(), &config.signals)?;
    print_json(&signal)
}

async fn show_analysis(
    config: &Config,
    input: &Path,
    onchain: &OnChainArgs,
    model_path: Option<&Path>,
) -> anyhow::Result<()> {
    let candles = read_candles(input).await?;
    let model = match model_path {
        Some(path) => Some(read_model(path).await?),
        None => None,
    };

    let analysis = analyze(&candles, &onchain.inputs(), config, model.as_ref())?;
    print_json(&analysis)
}
