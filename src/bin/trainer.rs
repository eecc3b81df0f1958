use anyhow::Result;
use clap::Parser;
use lunchrec::algorithms::{AlsParams, AlsTrainer, CollaborativeFiltering, MatrixBuilder};
use lunchrec::services::votes::{InMemoryVoteSource, VoteScope, VoteSource};
use lunchrec::{init_tracing, Config};
use tracing::info;

/// Trains the latent factor model on a vote file and prints what it learned.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    /// JSON array of vote records.
    #[arg(short, long)]
    votes: String,

    /// Print recommendations and neighbours for this user.
    #[arg(short, long)]
    user: Option<String>,

    #[arg(short, long, default_value_t = 10)]
    n: usize,

    #[arg(long)]
    factors: Option<usize>,

    #[arg(long)]
    iterations: Option<usize>,

    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let config = if std::path::Path::new(&args.config).exists() {
        Config::from_file(&args.config)?
    } else {
        info!("Config file not found, using default configuration");
        Config::default()
    };

    let mut params = AlsParams::from(&config.training);
    if let Some(factors) = args.factors {
        params.factors = factors;
    }
    if let Some(iterations) = args.iterations {
        params.iterations = iterations;
    }
    info!("Training configuration: {:?}", params);

    let store = InMemoryVoteSource::from_json_file(&args.votes)?;
    let records = store.load(&VoteScope::All).await?;
    let matrix = MatrixBuilder::new().build(&records);

    let stats = matrix.stats();
    println!("{}", serde_json::to_string_pretty(&stats)?);

    let model = tokio::task::spawn_blocking({
        let matrix = matrix.clone();
        move || AlsTrainer::new(params).train(&matrix)
    })
    .await??;

    println!(
        "Trained {} users x {} items with {} factors in {} iterations (loss {:.4})",
        model.user_count(),
        model.item_count(),
        model.factors(),
        model.iterations_run(),
        model.final_loss()
    );

    if let Some(user) = args.user {
        let cf = CollaborativeFiltering::fit(&matrix, config.recommendation.neighbors);

        println!("Latent factor recommendations for {}:", user);
        for candidate in model.recommend(&user, args.n) {
            println!("  {:<24} {:.4}", candidate.item_id, candidate.score);
        }

        println!("Similar users to {}:", user);
        for similar in cf.similar_users(&user, args.n) {
            println!("  {:<24} {:.4}", similar.user_id, similar.similarity);
        }
    }

    Ok(())
}
