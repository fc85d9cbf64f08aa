use crate::config::MonitorConfig;
use crate::error::CollaboratorError;
use crate::models::{ExitReason, LifecycleEvent};
use crate::retry::retry_collaborator_call;
use anyhow::{Context, Result};
use chrono::Utc;
use log::info;
use reqwest::Client;
use serde_json::{json, Value};
use std::future::Future;
use std::time::Duration;

const ENTRY_COLOR: u32 = 3_447_003;
const TAKE_PROFIT_COLOR: u32 = 3_066_993;
const STOP_LOSS_COLOR: u32 = 15_158_332;
const NEUTRAL_COLOR: u32 = 10_070_709;
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Receives every lifecycle event the live monitor produces.
pub trait NotificationSink: Send + Sync + 'static {
    fn notify(
        &self,
        config: &MonitorConfig,
        event: &LifecycleEvent,
    ) -> impl Future<Output = Result<(), CollaboratorError>> + Send;
}

/// Writes events to the process log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl NotificationSink for LogNotifier {
    async fn notify(
        &self,
        config: &MonitorConfig,
        event: &LifecycleEvent,
    ) -> Result<(), CollaboratorError> {
        let position = event.position();
        match event {
            LifecycleEvent::Opened(_) => info!(
                "{} {} {} @ {:.5} (stop {:.5}, target {:.5}, size {:.2})",
                config.symbol,
                event.label(),
                position.direction,
                position.entry_price,
                position.stop_loss,
                position.take_profit,
                position.size
            ),
            LifecycleEvent::Closed(trade) => info!(
                "{} {} {} @ {:.5} ({:+.2}%, pnl {:.2})",
                config.symbol,
                event.label(),
                position.direction,
                trade.exit_price,
                trade.return_percent(),
                trade.pnl
            ),
        }
        Ok(())
    }
}

/// Posts one Discord-style embed per event.
pub struct WebhookNotifier {
    http: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .context("Failed to build webhook HTTP client")?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }

    async fn post(&self, payload: &Value) -> Result<(), CollaboratorError> {
        let response = self
            .http
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .map_err(|err| CollaboratorError::Notification(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::NotificationRejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

impl NotificationSink for WebhookNotifier {
    async fn notify(
        &self,
        config: &MonitorConfig,
        event: &LifecycleEvent,
    ) -> Result<(), CollaboratorError> {
        let payload = build_embed(config, event);
        retry_collaborator_call!(
            format!("{} webhook for {}", event.label(), config.symbol),
            self.post(&payload),
            CollaboratorError::is_transient
        )
    }
}

/// Logs every event and forwards it to the webhook when one is configured.
pub struct MonitorNotifier {
    webhook: Option<WebhookNotifier>,
}

impl MonitorNotifier {
    pub fn new(webhook_url: Option<&str>) -> Result<Self> {
        let webhook = webhook_url.map(|url| WebhookNotifier::new(url)).transpose()?;
        Ok(Self { webhook })
    }
}

impl NotificationSink for MonitorNotifier {
    async fn notify(
        &self,
        config: &MonitorConfig,
        event: &LifecycleEvent,
    ) -> Result<(), CollaboratorError> {
        LogNotifier.notify(config, event).await?;
        match &self.webhook {
            Some(webhook) => webhook.notify(config, event).await,
            None => Ok(()),
        }
    }
}

fn event_color(event: &LifecycleEvent) -> u32 {
    match event {
        LifecycleEvent::Opened(_) => ENTRY_COLOR,
        LifecycleEvent::Closed(trade) => match trade.exit_reason {
            ExitReason::TakeProfit => TAKE_PROFIT_COLOR,
            ExitReason::StopLoss => STOP_LOSS_COLOR,
            ExitReason::EndOfPeriod => NEUTRAL_COLOR,
        },
    }
}

fn field(name: &str, value: String) -> Value {
    json!({ "name": name, "value": value, "inline": true })
}

pub fn build_embed(config: &MonitorConfig, event: &LifecycleEvent) -> Value {
    let position = event.position();
    let mut fields = vec![
        field("Symbol", config.symbol.clone()),
        field("Strategy", config.strategy_label()),
        field("Timeframe", config.timeframe.clone()),
        field("Entry Price", format!("{:.5}", position.entry_price)),
    ];

    match event {
        LifecycleEvent::Opened(_) => {
            fields.push(field("Stop Loss", format!("{:.5}", position.stop_loss)));
            fields.push(field("Take Profit", format!("{:.5}", position.take_profit)));
        }
        LifecycleEvent::Closed(trade) => {
            fields.push(field("Exit Price", format!("{:.5}", trade.exit_price)));
            fields.push(field("Result", format!("{:+.2}%", trade.return_percent())));
        }
    }

    json!({
        "embeds": [{
            "title": format!("{} {}", position.direction.as_str().to_uppercase(), event.label()),
            "color": event_color(event),
            "fields": fields,
            "timestamp": Utc::now().to_rfc3339(),
        }]
    })
}
