// =============================================================================
// MarketFeed streaming worker
// =============================================================================
//
// A single long-lived WebSocket connection multiplexes every (symbol,
// interval) kline subscription plus one ticker subscription per symbol.
// Reconnection uses exponential backoff (5s .. 60s, 10 attempts) and
// re-issues the full subscription list on every reconnect. An idle
// connection (no message in 60s) is pinged; three missed heartbeats are
// treated as a lost connection.
//
// Grounded on the kline-stream connect/parse loop in the teacher's
// market_data module, generalized from one connection per symbol/interval
// to a single multiplexed connection per the external interface contract.
// =============================================================================

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use super::kline::{Kline, KlineKey, KlineRing};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_RECONNECT_ATTEMPTS: u32 = 10;
const BACKOFF_START: Duration = Duration::from_secs(5);
const BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Command sent from `MarketFeed::add_symbol`/`remove_symbol` to the live
/// stream worker.
#[derive(Debug, Clone)]
pub enum StreamCommand {
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
}

/// Shared price map updated from ticker messages.
pub type PriceMap = Arc<RwLock<std::collections::HashMap<String, f64>>>;

/// Run the stream worker until the caller drops `cmd_rx` or the process
/// exits. Reconnects automatically; never returns `Err` under normal
/// operation — surrendering after exhausting reconnect attempts still
/// returns `Ok(())` so the pipeline keeps relying on REST instead of dying.
pub async fn run(
    ws_url: String,
    ring: Arc<KlineRing>,
    prices: PriceMap,
    mut cmd_rx: mpsc::UnboundedReceiver<StreamCommand>,
) -> Result<()> {
    let mut topics: HashSet<String> = HashSet::new();
    let mut attempt = 0u32;

    loop {
        // Drain any commands queued while disconnected so the next connect
        // subscribes to the up-to-date topic set.
        while let Ok(cmd) = cmd_rx.try_recv() {
            apply_command(&mut topics, cmd);
        }

        match connect_and_run(&ws_url, &ring, &prices, &mut topics, &mut cmd_rx).await {
            Ok(()) => {
                // Graceful close (e.g. no more commands will ever arrive).
                return Ok(());
            }
            Err(e) => {
                attempt += 1;
                warn!(error = %e, attempt, "market stream connection lost");
                if attempt > MAX_RECONNECT_ATTEMPTS {
                    error!(attempts = attempt, "market stream exhausted reconnect attempts, surrendering");
                    return Ok(());
                }
                let backoff = std::cmp::min(BACKOFF_START * 2u32.pow(attempt.saturating_sub(1)), BACKOFF_CAP);
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

fn apply_command(topics: &mut HashSet<String>, cmd: StreamCommand) {
    match cmd {
        StreamCommand::Subscribe(ts) => {
            for t in ts {
                topics.insert(t);
            }
        }
        StreamCommand::Unsubscribe(ts) => {
            for t in ts {
                topics.remove(&t);
            }
        }
    }
}

async fn connect_and_run(
    ws_url: &str,
    ring: &Arc<KlineRing>,
    prices: &PriceMap,
    topics: &mut HashSet<String>,
    cmd_rx: &mut mpsc::UnboundedReceiver<StreamCommand>,
) -> Result<()> {
    info!(url = %ws_url, "connecting market data stream");
    let (ws_stream, _resp) = connect_async(ws_url)
        .await
        .context("failed to connect market data WebSocket")?;
    let (mut write, mut read) = ws_stream.split();

    if !topics.is_empty() {
        resubscribe(&mut write, topics, 1).await?;
    }

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    let mut missed_heartbeats = 0u32;
    let mut last_message = Instant::now();
    let mut next_sub_id: u64 = 2;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(StreamCommand::Subscribe(ts)) => {
                        let fresh: Vec<String> = ts.into_iter().filter(|t| !topics.contains(t)).collect();
                        if !fresh.is_empty() {
                            send_method(&mut write, "SUBSCRIBE", &fresh, next_sub_id).await?;
                            next_sub_id += 1;
                            for t in fresh { topics.insert(t); }
                        }
                    }
                    Some(StreamCommand::Unsubscribe(ts)) => {
                        if !ts.is_empty() {
                            send_method(&mut write, "UNSUBSCRIBE", &ts, next_sub_id).await?;
                            next_sub_id += 1;
                            for t in &ts { topics.remove(t); }
                        }
                    }
                    None => {
                        // Command channel closed -- caller is shutting the feed down.
                        let _ = write.close().await;
                        return Ok(());
                    }
                }
            }
            _ = heartbeat.tick() => {
                if last_message.elapsed() >= IDLE_TIMEOUT {
                    if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                        anyhow::bail!("heartbeat ping failed: {e}");
                    }
                    missed_heartbeats += 1;
                    if missed_heartbeats >= 3 {
                        anyhow::bail!("three consecutive missed heartbeats, reconnecting");
                    }
                }
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        last_message = Instant::now();
                        missed_heartbeats = 0;
                        handle_message(&text, ring, prices);
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_message = Instant::now();
                        missed_heartbeats = 0;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => anyhow::bail!("stream read error: {e}"),
                    None => anyhow::bail!("stream ended"),
                }
            }
        }
    }
}

async fn resubscribe(
    write: &mut futures_util::stream::SplitSink<
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
        Message,
    >,
    topics: &HashSet<String>,
    id: u64,
) -> Result<()> {
    let all: Vec<String> = topics.iter().cloned().collect();
    send_method(write, "SUBSCRIBE", &all, id).await
}

async fn send_method(
    write: &mut futures_util::stream::SplitSink<
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
        Message,
    >,
    method: &str,
    params: &[String],
    id: u64,
) -> Result<()> {
    let frame = json!({ "method": method, "params": params, "id": id });
    write
        .send(Message::Text(frame.to_string()))
        .await
        .with_context(|| format!("failed to send {method} frame"))
}

fn handle_message(text: &str, ring: &Arc<KlineRing>, prices: &PriceMap) {
    let root: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "ignoring unparseable stream message");
            return;
        }
    };

    let data = if root.get("data").is_some() { &root["data"] } else { &root };

    if let Some(k) = data.get("k") {
        if let Some((key, kline)) = parse_kline(data, k) {
            if kline.is_closed {
                debug!(key = %key, close = kline.close, "kline closed");
                ring.update(key, kline);
            }
        }
        return;
    }

    if let (Some(symbol), Some(price)) = (
        data.get("s").and_then(|v| v.as_str()),
        data.get("c").and_then(|v| v.as_str()).and_then(|s| s.parse::<f64>().ok()),
    ) {
        prices.write().insert(symbol.to_uppercase(), price);
    }
}

fn parse_kline(data: &serde_json::Value, k: &serde_json::Value) -> Option<(KlineKey, Kline)> {
    let symbol = data["s"].as_str()?.to_uppercase();
    let interval = k["i"].as_str()?.to_string();
    let open_time = k["t"].as_i64()?;
    let close_time = k["T"].as_i64()?;
    let open = parse_num(&k["o"])?;
    let high = parse_num(&k["h"])?;
    let low = parse_num(&k["l"])?;
    let close = parse_num(&k["c"])?;
    let volume = parse_num(&k["v"])?;
    let quote_volume = parse_num(&k["q"])?;
    let taker_buy_volume = parse_num(&k["V"]).unwrap_or(0.0);
    let taker_buy_quote_volume = parse_num(&k["Q"]).unwrap_or(0.0);
    let trades_count = k["n"].as_u64().unwrap_or(0);
    let is_closed = k["x"].as_bool().unwrap_or(false);

    Some((
        KlineKey { symbol, interval },
        Kline {
            open_time,
            close_time,
            open,
            high,
            low,
            close,
            volume,
            quote_volume,
            trades_count,
            taker_buy_volume,
            taker_buy_quote_volume,
            is_closed,
        },
    ))
}

fn parse_num(val: &serde_json::Value) -> Option<f64> {
    match val {
        serde_json::Value::String(s) => s.parse::<f64>().ok(),
        serde_json::Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Build the subscription topic for a kline stream.
pub fn kline_topic(symbol: &str, interval: &str) -> String {
    format!("{}@kline_{}", symbol.to_lowercase(), interval)
}

/// Build the subscription topic for a ticker stream.
pub fn ticker_topic(symbol: &str) -> String {
    format!("{}@ticker", symbol.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_are_lowercase() {
        assert_eq!(kline_topic("BTCUSDT", "3m"), "btcusdt@kline_3m");
        assert_eq!(ticker_topic("ETHUSDT"), "ethusdt@ticker");
    }

    #[test]
    fn parse_kline_message_combined_stream_shape() {
        let root: serde_json::Value = serde_json::from_str(
            r#"{
                "stream": "btcusdt@kline_3m",
                "data": {
                    "e": "kline",
                    "s": "BTCUSDT",
                    "k": {
                        "t": 1700000000000,
                        "T": 1700000179999,
                        "i": "3m",
                        "o": "37000.00",
                        "h": "37050.00",
                        "l": "36990.00",
                        "c": "37020.00",
                        "v": "123.456",
                        "q": "4567890.12",
                        "n": 1500,
                        "V": "60.123",
                        "Q": "2224455.66",
                        "x": true
                    }
                }
            }"#,
        )
        .unwrap();
        let data = &root["data"];
        let (key, kline) = parse_kline(data, &data["k"]).expect("should parse");
        assert_eq!(key.symbol, "BTCUSDT");
        assert!(kline.is_closed);
        assert!((kline.close - 37020.0).abs() < f64::EPSILON);
    }

    #[test]
    fn apply_command_subscribe_then_unsubscribe() {
        let mut topics = HashSet::new();
        apply_command(&mut topics, StreamCommand::Subscribe(vec!["a".into(), "b".into()]));
        assert_eq!(topics.len(), 2);
        apply_command(&mut topics, StreamCommand::Unsubscribe(vec!["a".into()]));
        assert!(topics.contains("b"));
        assert!(!topics.contains("a"));
    }
}
