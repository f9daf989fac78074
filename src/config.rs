// =============================================================================
// Configuration — process-level connection settings and per-trader configs
// =============================================================================
//
// Grounded on the teacher's `runtime_config::RuntimeConfig::load` (load, log,
// degrade-to-default idiom) and on the original's `config/settings.py` +
// `services/trader_manager.py::_build_trader_config`/`_get_system_config`:
// each enabled `traders` row is joined against its `ai_models`, `exchanges`,
// `user_signal_sources`, and `prompt_templates` rows to build one immutable
// `TraderConfig`. A trader missing a required join (AI model or exchange) is
// skipped with a logged warning rather than failing the whole load
// (§7 ConfigError policy).
// =============================================================================

use std::env;

use tracing::{info, warn};
use uuid::Uuid;

use crate::store::StoreRepository;

/// AI collaborator connection details for one trader.
#[derive(Debug, Clone)]
pub struct AiModelConfig {
    pub provider: String,
    pub base_url: String,
    pub api_key: String,
    pub model_name: String,
}

/// Exchange credentials for one trader.
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    pub name: String,
    pub api_key: String,
    pub secret_key: String,
    pub testnet: bool,
}

/// External signal-feed toggles and URLs for one trader.
#[derive(Debug, Clone, Default)]
pub struct SignalSourceConfig {
    pub use_coin_pool: bool,
    pub coin_pool_url: Option<String>,
    pub use_oi_top: bool,
    pub oi_top_url: Option<String>,
    pub use_inside_coins: bool,
}

/// System-wide risk knobs read once at supervisor startup and copied into
/// every `TraderConfig` (`system_config` table).
#[derive(Debug, Clone)]
pub struct SystemRiskConfig {
    pub max_daily_loss: f64,
    pub max_drawdown: f64,
    pub stop_trading_minutes: u32,
    pub default_coins: String,
}

impl Default for SystemRiskConfig {
    fn default() -> Self {
        Self {
            max_daily_loss: 10.0,
            max_drawdown: 20.0,
            stop_trading_minutes: 60,
            default_coins: "BTC/USDT".into(),
        }
    }
}

/// Everything one `TraderWorker` needs for its whole lifetime. Immutable
/// after load; a config change requires `TraderSupervisor::reload`.
#[derive(Debug, Clone)]
pub struct TraderConfig {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub scan_interval_minutes: u32,
    pub ai_model: AiModelConfig,
    pub exchange: ExchangeConfig,
    pub btc_eth_leverage: u32,
    pub altcoin_leverage: u32,
    pub signal_source: SignalSourceConfig,
    pub trading_coins: Vec<String>,
    pub prompt_template: String,
    pub system: SystemRiskConfig,
}

/// Read the `system_config` k/v rows, falling back to their documented
/// defaults for anything missing or malformed.
pub async fn load_system_risk_config(repo: &StoreRepository) -> SystemRiskConfig {
    let defaults = SystemRiskConfig::default();

    let max_daily_loss = repo
        .get_system_config("max_daily_loss", &defaults.max_daily_loss.to_string())
        .await
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults.max_daily_loss);

    let max_drawdown = repo
        .get_system_config("max_drawdown", &defaults.max_drawdown.to_string())
        .await
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults.max_drawdown);

    let stop_trading_minutes = repo
        .get_system_config("stop_trading_minutes", &defaults.stop_trading_minutes.to_string())
        .await
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults.stop_trading_minutes);

    let default_coins = repo
        .get_system_config("default_coins", &defaults.default_coins)
        .await
        .unwrap_or(defaults.default_coins);

    SystemRiskConfig { max_daily_loss, max_drawdown, stop_trading_minutes, default_coins }
}

/// Load one `TraderConfig` per enabled `traders` row, skipping (with a
/// logged warning) any row whose AI model or exchange join fails to resolve.
pub async fn load_trader_configs(repo: &StoreRepository) -> Vec<TraderConfig> {
    let system = load_system_risk_config(repo).await;

    let trader_rows = match repo.list_enabled_traders().await {
        Ok(rows) => rows,
        Err(e) => {
            warn!(error = %e, "failed to load trader rows from the store");
            return Vec::new();
        }
    };

    let mut configs = Vec::with_capacity(trader_rows.len());

    for trader in trader_rows {
        let ai_model = match repo.get_ai_model(trader.ai_model_id).await {
            Ok(row) if row.enabled => row,
            Ok(_) => {
                warn!(trader_id = %trader.id, "ai model disabled, skipping trader");
                continue;
            }
            Err(e) => {
                warn!(trader_id = %trader.id, error = %e, "ai model lookup failed, skipping trader");
                continue;
            }
        };

        let exchange = match repo.get_exchange(trader.exchange_id).await {
            Ok(row) => row,
            Err(e) => {
                warn!(trader_id = %trader.id, error = %e, "exchange lookup failed, skipping trader");
                continue;
            }
        };

        let signal_source = match trader.signal_source_id {
            Some(id) => match repo.get_signal_source(id).await {
                Ok(Some(row)) => SignalSourceConfig {
                    use_coin_pool: row.use_coin_pool,
                    coin_pool_url: row.coin_pool_url,
                    use_oi_top: row.use_oi_top,
                    oi_top_url: row.oi_top_url,
                    use_inside_coins: row.use_inside_coins,
                },
                Ok(None) => SignalSourceConfig::default(),
                Err(e) => {
                    warn!(trader_id = %trader.id, error = %e, "signal source lookup failed, using defaults");
                    SignalSourceConfig::default()
                }
            },
            None => SignalSourceConfig::default(),
        };

        let prompt_template = match trader.prompt_template_id {
            Some(id) => match repo.get_prompt_template(id).await {
                Ok(Some(row)) => row.content,
                _ => default_system_prompt(),
            },
            None => default_system_prompt(),
        };

        let trading_coins: Vec<String> = trader
            .trading_coins
            .as_deref()
            .map(|s| s.split(',').map(|c| c.trim().to_string()).filter(|c| !c.is_empty()).collect())
            .filter(|v: &Vec<String>| !v.is_empty())
            .unwrap_or_else(|| vec![system.default_coins.clone()]);

        configs.push(TraderConfig {
            id: trader.id,
            user_id: trader.user_id,
            name: trader.name,
            scan_interval_minutes: trader.scan_interval_minutes.max(1) as u32,
            ai_model: AiModelConfig {
                provider: ai_model.provider,
                base_url: ai_model.base_url,
                api_key: ai_model.api_key,
                model_name: ai_model.model_name,
            },
            exchange: ExchangeConfig {
                name: exchange.name,
                api_key: exchange.api_key,
                secret_key: exchange.secret_key,
                testnet: exchange.testnet,
            },
            btc_eth_leverage: trader.btc_eth_leverage.max(1) as u32,
            altcoin_leverage: trader.altcoin_leverage.max(1) as u32,
            signal_source,
            trading_coins,
            prompt_template,
            system: system.clone(),
        });
    }

    info!(count = configs.len(), "trader configs loaded");
    configs
}

fn default_system_prompt() -> String {
    "You are a disciplined crypto futures trading assistant. Respond only with the \
     requested JSON decision list."
        .to_string()
}

/// Postgres connection components, read once at startup via `dotenvy`.
pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => info!(path = ?path, "loaded .env file"),
        Err(_) => info!("no .env file found, relying on process environment"),
    }
}

/// Exchange futures websocket base URL, overridable via `MARKET_WS_URL`.
pub fn market_ws_url() -> String {
    env::var("MARKET_WS_URL")
        .unwrap_or_else(|_| "wss://fstream.binance.com/stream".to_string())
}
