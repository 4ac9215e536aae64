use clap::Parser;
use movers_core::domain::market::Symbol;
use movers_core::engine::Engine;
use movers_core::ingest::universe::MarketIndex;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "movers_worker")]
struct Args {
    /// Index to rank: sp500, nifty50 or ftse100.
    #[arg(long, default_value = "nifty50")]
    index: MarketIndex,

    /// Also compute the signal for a single ticker (e.g. TCS.NS).
    #[arg(long)]
    ticker: Option<String>,

    /// Ask the AI backend a question about the ranked movers.
    #[arg(long)]
    ask: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = movers_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let engine = match Engine::from_settings(&settings) {
        Ok(engine) => engine,
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            return Err(e);
        }
    };

    let report = engine.top_movers(args.index).await;
    if let Some(reason) = report.unavailable.as_deref() {
        tracing::warn!(index = %args.index, reason, "movers unavailable");
    }
    println!("{}", serde_json::to_string(&report)?);

    if let Some(raw) = args.ticker.as_deref() {
        match Symbol::parse(raw) {
            Some(symbol) => match engine.ticker_signal(&symbol).await {
                Ok(signal) => println!(
                    "{}",
                    serde_json::json!({ "ticker": symbol, "signal": signal })
                ),
                Err(e) => {
                    tracing::warn!(%symbol, error = %e, "ticker lookup failed");
                    println!(
                        "{}",
                        serde_json::json!({ "ticker": symbol, "error": e.to_string() })
                    );
                }
            },
            None => tracing::warn!(ticker = raw, "ignoring malformed ticker"),
        }
    }

    if let Some(prompt) = args.ask.as_deref() {
        let result = engine.ask(prompt, &report.ranked).await;
        println!("{}", serde_json::to_string(&result)?);
    }

    Ok(())
}

fn init_sentry(settings: &movers_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
