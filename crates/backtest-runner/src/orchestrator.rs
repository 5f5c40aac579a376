use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use rust_decimal::Decimal;

use backtest_core::{BarStore, Strategy, StrategyEvaluator, TradeSide};
use backtest_data::{DataProvider, DataRequest};
use backtest_engine::{
    BacktestResult, BacktestRunRecord, CostModelConfig, RunStatus, RunStore, SimulationEngine,
    TradingCostModel,
};

use crate::events::{EventLogger, IndexEntry, RunEvent};
use crate::provenance;

/// Highest run-id millisecond handed out so far; bumping past it keeps
/// concurrent runs in distinct `bt_<ms>` directories.
static LAST_RUN_MS: AtomicI64 = AtomicI64::new(0);

fn next_run_id() -> String {
    let mut candidate = Utc::now().timestamp_millis();
    loop {
        let last = LAST_RUN_MS.load(Ordering::SeqCst);
        if candidate <= last {
            candidate = last + 1;
        }
        if LAST_RUN_MS
            .compare_exchange(last, candidate, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            return format!("bt_{candidate}");
        }
    }
}

/// A finished orchestration: the result plus the run id its artifacts
/// (event stream, persisted record) live under.
#[derive(Debug)]
pub struct RunOutcome {
    pub run_id: String,
    pub result: BacktestResult,
}

/// End-to-end workflow: dataset resolution, tier-gated simulation, event
/// stream, provenance hashing and run persistence. Collaborators are
/// plain constructor parameters; each `run` call owns its state.
pub struct BacktestOrchestrator<S: BarStore, R: RunStore> {
    provider: DataProvider<S>,
    run_store: R,
    cost_config: CostModelConfig,
    backtests_dir: PathBuf,
}

impl<S: BarStore, R: RunStore> BacktestOrchestrator<S, R> {
    pub fn new(
        provider: DataProvider<S>,
        run_store: R,
        cost_config: CostModelConfig,
        backtests_dir: PathBuf,
    ) -> Self {
        Self {
            provider,
            run_store,
            cost_config,
            backtests_dir,
        }
    }

    /// Compose under `<app-data>/coinlab/backtests`.
    pub fn with_default_dir(
        provider: DataProvider<S>,
        run_store: R,
        cost_config: CostModelConfig,
    ) -> Self {
        Self::new(provider, run_store, cost_config, EventLogger::default_base_dir())
    }

    /// Run one backtest. Failures surface through the result's
    /// `validation_error`; this never returns an error for a bad run.
    pub async fn run<E: StrategyEvaluator>(
        &self,
        strategy: &Strategy,
        request: &DataRequest,
        starting_balance: Decimal,
        evaluator: E,
    ) -> RunOutcome {
        let run_id = next_run_id();
        let mut logger = EventLogger::create(&self.backtests_dir, &run_id).unwrap_or_else(|err| {
            tracing::warn!(%run_id, error = %err, "cannot create run directory; events disabled");
            EventLogger::disabled(&run_id)
        });

        let selection = match self.provider.select(request).await {
            Ok(selection) => selection,
            Err(err) => {
                let pair = strategy
                    .trading_pairs
                    .first()
                    .cloned()
                    .unwrap_or_else(|| request.asset.clone());
                let mut result = BacktestResult::empty(
                    strategy,
                    &pair,
                    starting_balance,
                    self.cost_config.assumed_cost_bps(),
                );
                result.validation_error = Some(err.to_string());
                logger.emit(&RunEvent::Error {
                    message: err.to_string(),
                    bar_timestamp: None,
                });
                self.append_index(&logger, &run_id, &result, 0, 0);
                return RunOutcome { run_id, result };
            }
        };

        logger.emit(&RunEvent::BacktestStart {
            strategy_name: strategy.name.clone(),
            starting_balance,
            asset: selection.asset.clone(),
            timeframe: selection.timeframe.as_str().to_string(),
            tier: selection.tier.tier_name().to_string(),
        });

        let mut engine = SimulationEngine::new(
            TradingCostModel::new(self.cost_config.clone()),
            evaluator,
        );
        let mut result =
            engine.run_backtest(strategy, &selection.bars, starting_balance, Some(&selection.tagged));

        let start_time = selection.bars.first().map(|b| b.timestamp).unwrap_or(selection.start_ts);
        let end_time = selection.bars.last().map(|b| b.timestamp).unwrap_or(selection.end_ts);

        if let Some(message) = result.validation_error.clone() {
            logger.emit(&RunEvent::Error {
                message,
                bar_timestamp: None,
            });
        } else {
            for trade in &result.trades {
                logger.emit(&RunEvent::Trade {
                    timestamp: trade.timestamp,
                    action: TradeSide::Buy,
                    price: trade.entry_price,
                    size: trade.volume,
                    pnl: None,
                });
                logger.emit(&RunEvent::Trade {
                    timestamp: trade.timestamp,
                    action: TradeSide::Sell,
                    price: trade.exit_price,
                    size: trade.volume,
                    pnl: Some(trade.pnl),
                });
            }
            logger.emit(&RunEvent::BacktestEnd {
                total_trades: result.total_trades,
                win_rate: result.win_rate,
                total_pnl: result.total_pnl,
                sharpe_ratio: result.sharpe_ratio,
                max_drawdown: result.max_drawdown,
            });

            // Zero-trade runs are never persisted.
            if result.total_trades > 0 {
                let hash = provenance::dataset_hash(
                    &selection.asset,
                    selection.timeframe,
                    selection.tier,
                    &selection.bars,
                );
                let record = BacktestRunRecord {
                    run_id: run_id.clone(),
                    strategy_id: strategy.id.clone(),
                    strategy_name: strategy.name.clone(),
                    asset: selection.asset.clone(),
                    timeframe: selection.timeframe.as_str().to_string(),
                    data_tier: selection.tier.tier_name().to_string(),
                    start_time,
                    end_time,
                    starting_balance,
                    ending_balance: result.ending_balance,
                    total_pnl: result.total_pnl,
                    total_trades: result.total_trades,
                    win_rate: result.win_rate,
                    profit_factor: result.profit_factor,
                    sharpe_ratio: result.sharpe_ratio,
                    max_drawdown: result.max_drawdown,
                    status: RunStatus::from_metrics(result.win_rate, result.profit_factor),
                    data_file_hashes: provenance::hashes_json(&[hash]),
                    parser_version: provenance::PARSER_VERSION.to_string(),
                    engine_version: provenance::ENGINE_VERSION.to_string(),
                };
                if let Err(err) = self.run_store.insert_run(&record).await {
                    tracing::error!(%run_id, error = %err, "failed to persist run record");
                    result.validation_error = Some(err.to_string());
                    logger.emit(&RunEvent::Error {
                        message: err.to_string(),
                        bar_timestamp: None,
                    });
                }
            }
        }

        self.append_index(&logger, &run_id, &result, start_time, end_time);
        RunOutcome { run_id, result }
    }

    fn append_index(
        &self,
        logger: &EventLogger,
        run_id: &str,
        result: &BacktestResult,
        start_time: i64,
        end_time: i64,
    ) {
        let entry = IndexEntry {
            run_id: run_id.to_string(),
            strategy_name: result.strategy_name.clone(),
            start_time,
            end_time,
            total_trades: result.total_trades,
            win_rate: result.win_rate,
            total_pnl: result.total_pnl,
            sharpe_ratio: result.sharpe_ratio,
            events_file: logger.events_path().to_path_buf(),
        };
        if let Err(err) = logger.append_index(&entry) {
            tracing::warn!(%run_id, error = %err, "failed to append run index row");
        }
    }
}
