//! Anticor Allocator - Main Entry Point
//!
//! Fetches daily price history, backtests the anti-correlation allocator and
//! inspects saved runs.

use anyhow::{Context, Result};
use anticor_allocator::backtest::{
    BacktestConfig, BacktestEngine, CsvDataLoader, DataLoader, ParameterSpace, SweepRunner,
};
use anticor_allocator::config::Config;
use anticor_allocator::history::{read_symbols_file, Downloader, YahooClient};
use anticor_allocator::persistence::RunStore;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::path::Path;
use tracing::{error, info, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Anticor Allocator CLI
#[derive(Parser)]
#[command(name = "anticor-allocator")]
#[command(version, about = "Anti-correlation portfolio allocation and backtesting")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download daily bars for every symbol and year
    Fetch {
        /// Symbol list file (one per line)
        #[arg(long)]
        symbols: Option<String>,

        /// Years to fetch, comma separated
        #[arg(long, value_delimiter = ',')]
        years: Vec<i32>,

        /// Directory to write CSV files into
        #[arg(long)]
        data_dir: Option<String>,
    },

    /// Run a backtest over the CSV files in the data directory
    Backtest {
        #[arg(long)]
        data_dir: Option<String>,

        #[arg(short, long)]
        window_size: Option<usize>,

        #[arg(short, long)]
        rebalance_frequency: Option<usize>,

        /// Initial cash
        #[arg(long)]
        cash: Option<Decimal>,

        /// Commission per fill
        #[arg(long)]
        commission: Option<Decimal>,

        /// First traded date (YYYY-MM-DD); earlier bars seed the weights
        #[arg(short, long)]
        start: Option<String>,

        /// Last traded date (YYYY-MM-DD)
        #[arg(short, long)]
        end: Option<String>,

        /// Output directory for results
        #[arg(short, long)]
        output: Option<String>,

        /// Do not record the run in the database
        #[arg(long)]
        no_save: bool,
    },

    /// Run a parameter sweep over window sizes and rebalance frequencies
    Sweep {
        #[arg(long)]
        data_dir: Option<String>,

        #[arg(long, value_delimiter = ',', default_values_t = vec![5, 9, 15, 20])]
        window_sizes: Vec<usize>,

        #[arg(long, value_delimiter = ',', default_values_t = vec![1, 5, 10, 20])]
        frequencies: Vec<usize>,

        #[arg(short, long)]
        start: Option<String>,

        #[arg(short, long)]
        end: Option<String>,

        /// Number of parallel backtests
        #[arg(short, long, default_value = "4")]
        parallelism: usize,

        /// Output directory for results
        #[arg(short, long)]
        output: Option<String>,
    },

    /// List saved backtest runs
    Runs {
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Show the trades of one run
        #[arg(long)]
        trades: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    let result = run(cli).await;
    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load()?;

    match cli.command {
        Commands::Fetch {
            symbols,
            years,
            data_dir,
        } => {
            if let Some(symbols) = symbols {
                config.data.symbols_file = symbols;
            }
            if !years.is_empty() {
                config.data.years = years;
            }
            if let Some(dir) = data_dir {
                config.data.data_dir = dir;
            }
            run_fetch(&config).await
        }
        Commands::Backtest {
            data_dir,
            window_size,
            rebalance_frequency,
            cash,
            commission,
            start,
            end,
            output,
            no_save,
        } => {
            if let Some(dir) = data_dir {
                config.data.data_dir = dir;
            }
            if let Some(w) = window_size {
                config.strategy.window_size = w;
            }
            if let Some(f) = rebalance_frequency {
                config.strategy.rebalance_frequency = f;
            }
            if let Some(cash) = cash {
                config.broker.initial_cash = cash;
            }
            if let Some(commission) = commission {
                config.broker.commission_per_trade = commission;
            }
            let backtest_config = BacktestConfig {
                start: start.as_deref().map(parse_date).transpose()?,
                end: end.as_deref().map(parse_date).transpose()?,
                ..BacktestConfig::default()
            };
            run_backtest(config, backtest_config, output.as_deref(), !no_save).await
        }
        Commands::Sweep {
            data_dir,
            window_sizes,
            frequencies,
            start,
            end,
            parallelism,
            output,
        } => {
            if let Some(dir) = data_dir {
                config.data.data_dir = dir;
            }
            let space = ParameterSpace {
                window_sizes,
                rebalance_frequencies: frequencies,
            };
            let backtest_config = BacktestConfig {
                start: start.as_deref().map(parse_date).transpose()?,
                end: end.as_deref().map(parse_date).transpose()?,
                record_equity_curve: false,
                ..BacktestConfig::default()
            };
            run_sweep(config, space, backtest_config, parallelism, output.as_deref()).await
        }
        Commands::Runs { limit, trades } => show_runs(&config, limit, trades),
    }
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| anyhow::anyhow!("Invalid date '{}': {}", s, e))
}

/// Download missing daily bar files.
async fn run_fetch(config: &Config) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!("║              FETCH HISTORY                                 ║");
    info!("╚════════════════════════════════════════════════════════════╝");

    let symbols = read_symbols_file(&config.data.symbols_file)?;
    info!(
        "📋 {} symbols from {}, years {:?}",
        symbols.len(),
        config.data.symbols_file,
        config.data.years
    );

    let client = YahooClient::from_config(&config.data)?;
    let downloader = Downloader::new(client, &config.data.data_dir);
    let report = downloader.fetch_all(&symbols, &config.data.years).await?;

    println!("\n{}", report.summary());
    Ok(())
}

/// Run a single backtest.
async fn run_backtest(
    config: Config,
    backtest_config: BacktestConfig,
    output_dir: Option<&str>,
    save: bool,
) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!("║              BACKTEST MODE                                 ║");
    info!("╚════════════════════════════════════════════════════════════╝");

    config.validate()?;
    let data_loader = load_data(&config)?;
    log_config(&config);

    let db_path = config.persistence.db_path.clone();
    let engine = BacktestEngine::new(data_loader, config, backtest_config);
    let result = tokio::task::spawn_blocking(move || engine.run())
        .await
        .context("Backtest task failed")??;

    println!("\n{}", result.summary());

    if let Some(dir) = output_dir {
        std::fs::create_dir_all(dir)?;
        let dir = Path::new(dir);

        result.equity_to_csv(dir.join("equity_curve.csv"))?;
        result.trades_to_csv(dir.join("trades.csv"))?;
        result.write_json(dir.join("result.json"))?;
        info!("📁 Results saved to: {}", dir.display());
    }

    if save {
        let store = RunStore::new(&db_path)?;
        let run_id = store.save_run(&result)?;
        info!("💾 Run #{} saved to {}", run_id, db_path);
    }

    Ok(())
}

/// Run a parameter sweep optimization.
async fn run_sweep(
    config: Config,
    space: ParameterSpace,
    backtest_config: BacktestConfig,
    parallelism: usize,
    output_dir: Option<&str>,
) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!("║           PARAMETER SWEEP MODE                             ║");
    info!("╚════════════════════════════════════════════════════════════╝");

    config.validate()?;
    anyhow::ensure!(
        space.window_sizes.iter().all(|w| *w >= 2),
        "Window sizes must be at least 2"
    );
    anyhow::ensure!(
        space.rebalance_frequencies.iter().all(|f| *f >= 1),
        "Rebalance frequencies must be at least 1"
    );

    let data_loader = load_data(&config)?;
    info!("🔢 Combinations: {}", space.combination_count());

    let runner = SweepRunner::new(space, config, backtest_config, parallelism);
    let results = runner.run(data_loader).await?;

    println!("\n{}", results.summary());

    if let Some(dir) = output_dir {
        std::fs::create_dir_all(dir)?;
        let path = format!("{}/sweep_results.csv", dir);
        results.to_csv(&path)?;
        info!("📁 Sweep results saved to: {}", path);
    }

    Ok(())
}

/// Print saved runs, or the trades of one run.
fn show_runs(config: &Config, limit: usize, trades: Option<i64>) -> Result<()> {
    let store = RunStore::new(&config.persistence.db_path)?;

    if let Some(run_id) = trades {
        let trades = store.trades_for_run(run_id)?;
        println!("Run #{}: {} trades", run_id, trades.len());
        println!(
            "{:<8} {:>8} {:>10} {:>10} {:>12} {:>12} {:>10}",
            "SYMBOL", "QTY", "ENTRY", "EXIT", "OPENED", "CLOSED", "PROFIT"
        );
        for t in trades {
            println!(
                "{:<8} {:>8} {:>10.2} {:>10.2} {:>12} {:>12} {:>10.2}",
                t.instrument, t.quantity, t.entry_price, t.exit_price, t.opened_on, t.closed_on, t.profit
            );
        }
        return Ok(());
    }

    let runs = store.recent_runs(limit)?;
    if runs.is_empty() {
        println!("No saved runs in {}", config.persistence.db_path);
        return Ok(());
    }

    println!(
        "{:>5} {:<20} {:<23} {:>4} {:>4} {:>5} {:>12} {:>9} {:>7} {:>7} {:>6}",
        "ID", "CREATED", "PERIOD", "W", "FREQ", "SYMS", "FINAL", "RETURN", "SHARPE", "MAXDD", "TRADES"
    );
    for run in runs {
        println!(
            "{:>5} {:<20} {:<23} {:>4} {:>4} {:>5} {:>12.2} {:>8.2}% {:>7.3} {:>6.2}% {:>6}",
            run.id,
            run.created_at.format("%Y-%m-%d %H:%M:%S"),
            format!("{}..{}", run.start_date, run.end_date),
            run.window_size,
            run.rebalance_frequency,
            run.instruments.len(),
            run.final_equity,
            run.total_return_pct,
            run.sharpe_ratio,
            run.max_drawdown * Decimal::ONE_HUNDRED,
            run.trade_count,
        );
    }

    Ok(())
}

fn load_data(config: &Config) -> Result<CsvDataLoader> {
    info!("📊 Loading data from: {}", config.data.data_dir);
    let data_loader = CsvDataLoader::from_dir(&config.data.data_dir)?;

    if let Some((data_start, data_end)) = data_loader.available_range() {
        info!("   Data range: {} to {}", data_start, data_end);
    }
    info!("   Instruments: {}", data_loader.instruments().len());
    info!("   Bars: {}", data_loader.len());

    Ok(data_loader)
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    info!("📋 Configuration:");
    info!("   Window Size: {}", config.strategy.window_size);
    info!("   Rebalance Frequency: {} bars", config.strategy.rebalance_frequency);
    info!("   Adjusted Signals: {}", config.strategy.use_adjusted_values);
    info!("   Adjusted Fills: {}", config.strategy.fill_with_adjusted_values);
    info!("   Initial Cash: ${}", config.broker.initial_cash);
    info!("   Commission: ${} per fill", config.broker.commission_per_trade);
}

fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    // Create logs directory
    std::fs::create_dir_all("logs")?;

    // File appender for detailed logs
    let file_appender = tracing_appender::rolling::daily("logs", "anticor.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    // Leak the guard to keep it alive for the program duration
    Box::leak(Box::new(_guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("anticor_allocator=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}
