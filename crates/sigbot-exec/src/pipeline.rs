//! Per-message orchestration.
//!
//! [`SignalPipeline::handle_message`] runs one message to completion:
//! dedup, prefilter, parse, size, execute, notify. Parse and sizing failures
//! stop the message before any order reaches the exchange. Messages are
//! handled one at a time in delivery order.

use std::sync::Arc;

use rust_decimal::Decimal;
use sigbot_core::config::TradingConfig;
use sigbot_core::dedup::MessageDedup;
use sigbot_core::error::{ExchangeError, ExecutionFailure, ParseFailure, SizingFailure};
use sigbot_core::{InstrumentRules, MessageEvent, Notification, OrderPlan, Signal};
use sigbot_td::Exchange;
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, info, warn};

use crate::book::PositionBook;
use crate::bounded;
use crate::engine::{ExecutionEngine, ExecutionResult};
use crate::notify::NotificationSender;
use crate::parser::SignalParser;
use crate::sizer::RiskSizer;
use crate::status::StatusBoard;

/// What happened to one message.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// The message id was already processed.
    Duplicate,
    /// No direction marker; not a signal.
    Ignored,
    ParseFailed(ParseFailure),
    SizingFailed(SizingFailure),
    /// Account, instrument or price data could not be read; nothing placed.
    ExchangeUnavailable(ExchangeError),
    Executed(ExecutionResult),
}

pub struct SignalPipeline {
    parser: SignalParser,
    sizer: RiskSizer,
    engine: ExecutionEngine,
    exchange: Arc<dyn Exchange>,
    book: Arc<PositionBook>,
    dedup: Mutex<MessageDedup>,
    events: NotificationSender,
    status: Option<Arc<StatusBoard>>,
    config: TradingConfig,
}

impl SignalPipeline {
    pub fn new(
        config: TradingConfig,
        exchange: Arc<dyn Exchange>,
        book: Arc<PositionBook>,
        events: NotificationSender,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self, regex::Error> {
        let parser = SignalParser::new(&config.quote_assets)?;
        let engine = ExecutionEngine::new(
            Arc::clone(&exchange),
            Arc::clone(&book),
            config.clone(),
            shutdown,
        );
        Ok(Self {
            parser,
            sizer: RiskSizer::new(config.clone()),
            engine,
            exchange,
            book,
            dedup: Mutex::new(MessageDedup::new(config.dedup_capacity)),
            events,
            status: None,
            config,
        })
    }

    pub fn with_status(mut self, status: Arc<StatusBoard>) -> Self {
        self.status = Some(status);
        self
    }

    pub async fn handle_message(&self, message: &MessageEvent) -> PipelineOutcome {
        if !self.dedup.lock().await.check_and_insert(&message.message_id) {
            debug!("[pipeline] message {} already processed", message.message_id);
            return PipelineOutcome::Duplicate;
        }
        if !self.parser.looks_like_signal(&message.text) {
            debug!("[pipeline] message {} carries no direction marker", message.message_id);
            return PipelineOutcome::Ignored;
        }

        let signal = match self.parser.parse(&message.text, &message.message_id) {
            Ok(signal) => signal,
            Err(failure) => {
                warn!("[pipeline] message {} dropped: {failure}", message.message_id);
                return PipelineOutcome::ParseFailed(failure);
            }
        };
        let summary = signal.summary();
        info!("[pipeline] message {} -> {summary}", message.message_id);
        self.emit(Notification::SignalDetected {
            message_id: message.message_id.clone(),
            raw_text: message.text.clone(),
            parsed_summary: summary.clone(),
        });
        if let Some(status) = &self.status {
            status.record_signal(summary).await;
        }

        let exchange_symbol = signal.symbol.exchange();
        if self.book.contains_symbol(&exchange_symbol).await {
            let failure = SizingFailure::PositionAlreadyOpen(exchange_symbol);
            warn!("[pipeline] {} not sized: {failure}", signal.symbol);
            return PipelineOutcome::SizingFailed(failure);
        }

        let (plan, rules) = match self.plan(&signal).await {
            Ok(planned) => planned,
            Err(outcome) => return outcome,
        };
        for adjustment in &plan.adjustments {
            info!("[pipeline] {} sizing: {adjustment}", plan.symbol);
        }

        let result = self.engine.execute(&plan, &rules).await;
        self.report(&plan, &result).await;
        PipelineOutcome::Executed(result)
    }

    /// Read account, instrument and price data, then size the signal.
    async fn plan(&self, signal: &Signal) -> Result<(OrderPlan, InstrumentRules), PipelineOutcome> {
        let timeout = self.config.query_timeout();
        let symbol = signal.symbol.exchange();

        let account = match bounded(timeout, self.exchange.account_snapshot()).await {
            Ok(account) => account,
            Err(e) => return Err(self.unavailable(&symbol, e).await),
        };
        let rules = match bounded(timeout, self.exchange.instrument_rules(&symbol)).await {
            Ok(rules) => rules,
            Err(e) => return Err(self.unavailable(&symbol, e).await),
        };
        let mark_price: Option<Decimal> = if signal.entry_price.is_none() {
            match bounded(timeout, self.exchange.mark_price(&symbol)).await {
                Ok(mark) => Some(mark),
                Err(e) => {
                    warn!("[pipeline] {symbol} mark price unavailable: {e}");
                    None
                }
            }
        } else {
            None
        };

        match self.sizer.size(signal, &account, &rules, mark_price) {
            Ok(plan) => Ok((plan, rules)),
            Err(failure) => {
                warn!("[pipeline] {} not sized: {failure}", signal.symbol);
                Err(PipelineOutcome::SizingFailed(failure))
            }
        }
    }

    async fn unavailable(&self, symbol: &str, error: ExchangeError) -> PipelineOutcome {
        warn!("[pipeline] {symbol} exchange data unavailable: {error}");
        if let Some(status) = &self.status {
            status.record_error(format!("{symbol}: {error}")).await;
        }
        PipelineOutcome::ExchangeUnavailable(error)
    }

    async fn report(&self, plan: &OrderPlan, result: &ExecutionResult) {
        if let Some(opened) = result.opened() {
            self.emit(Notification::PositionOpened {
                symbol: plan.symbol.clone(),
                direction: plan.direction,
                entry_price: opened.fill_price,
                quantity: opened.quantity,
                leverage: plan.leverage,
            });
            if let Some(status) = &self.status {
                status
                    .record_trade(format!(
                        "{} {} qty {} @ {} ({}x)",
                        plan.direction,
                        plan.symbol,
                        opened.quantity.normalize(),
                        opened.fill_price.normalize(),
                        plan.leverage
                    ))
                    .await;
                status.set_open_positions(self.book.len().await).await;
            }
        }

        match result {
            ExecutionResult::Success(_) => {}
            ExecutionResult::PartialSuccess { failed_targets, .. } => {
                warn!(
                    "[pipeline] {} opened without exits for targets {failed_targets:?}",
                    plan.symbol
                );
                self.emit(Notification::PartialExecution {
                    symbol: plan.symbol.clone(),
                    failed_targets: failed_targets.clone(),
                });
            }
            ExecutionResult::EntryUnsettled { key, entry } => {
                warn!("[pipeline] {} entry {entry} unsettled, tracked as {key}", plan.symbol);
                if let Some(status) = &self.status {
                    status
                        .record_error(format!(
                            "{}: entry {entry} unsettled, retrying cancel",
                            plan.symbol
                        ))
                        .await;
                    status.set_open_positions(self.book.len().await).await;
                }
            }
            ExecutionResult::Failed(failure) => self.report_failure(plan, failure).await,
        }
    }

    async fn report_failure(&self, plan: &OrderPlan, failure: &ExecutionFailure) {
        warn!("[pipeline] {} execution failed: {failure}", plan.symbol);
        if let Some(status) = &self.status {
            status.record_error(format!("{}: {failure}", plan.symbol)).await;
        }
        if self.config.notify_failures {
            self.emit(Notification::ExecutionFailed {
                symbol: plan.symbol.clone(),
                reason: failure.to_string(),
            });
        }
    }

    fn emit(&self, notification: Notification) {
        if self.events.send(notification).is_err() {
            debug!("[pipeline] notification channel closed");
        }
    }

    /// Handle messages until the channel closes or shutdown is signaled.
    /// A message in progress runs to completion first.
    pub async fn run(
        self,
        mut messages: mpsc::Receiver<MessageEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("[pipeline] accepting messages");
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                message = messages.recv() => match message {
                    Some(message) => {
                        self.handle_message(&message).await;
                    }
                    None => break,
                },
            }
        }
        info!("[pipeline] stopped accepting messages");
    }
}
