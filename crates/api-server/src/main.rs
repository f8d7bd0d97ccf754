use std::collections::HashSet;
use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use api_server::http::{self, RateLimitPolicy, RateLimiter, TokenVerifier};
use shared::chat::{ChatDependencies, ChatOrchestrator, ChatSettings};
use shared::config::ApiConfig;
use shared::llm::OllamaModelClient;
use shared::repos::Store;
use shared::security::{
    AttemptCounter, InMemoryAttemptCounter, InputValidator, Notifier, OutputValidator,
    RedisAttemptCounter, SecurityIncidentLogger, WebhookNotifier,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "api_server=debug,shared=info,axum=info";
const RATE_LIMIT_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = ApiConfig::from_env().unwrap_or_else(|err| fatal("failed to read config", err));

    let store = Store::connect(&config.database_url, config.database_max_connections)
        .await
        .unwrap_or_else(|err| fatal("failed to connect to postgres", err));

    let migrator = sqlx::migrate::Migrator::new(config.migrations_dir.clone())
        .await
        .unwrap_or_else(|err| fatal("failed to load migrations", err));
    if let Err(err) = migrator.run(store.pool()).await {
        fatal("failed to run migrations", err);
    }

    let counter: Arc<dyn AttemptCounter> = match config.security.attempt_counter_redis_url.as_deref()
    {
        Some(redis_url) => Arc::new(
            RedisAttemptCounter::connect(redis_url)
                .await
                .unwrap_or_else(|err| fatal("failed to connect attempt counter to redis", err)),
        ),
        None => {
            warn!("SECURITY_ATTEMPT_COUNTER_REDIS_URL unset; attempt counters are process-local");
            Arc::new(InMemoryAttemptCounter::new())
        }
    };

    let notifier: Option<Arc<dyn Notifier>> = match config.security.notify_webhook_url.as_deref() {
        Some(url) => Some(Arc::new(
            WebhookNotifier::new(url)
                .unwrap_or_else(|err| fatal("failed to build alert notifier", err)),
        )),
        None => None,
    };

    let system_prompt = config
        .system_prompt
        .effective_prompt()
        .map(str::to_string);
    let model_client = OllamaModelClient::new(&config.ollama)
        .unwrap_or_else(|err| fatal("failed to build model client", err));
    let input_screen = InputValidator::with_default_rules()
        .unwrap_or_else(|err| fatal("failed to compile input rules", err));
    let output_screen = OutputValidator::with_default_rules(system_prompt.as_deref())
        .unwrap_or_else(|err| fatal("failed to compile output rules", err));

    let incidents = SecurityIncidentLogger::new(
        config.security.clone(),
        counter,
        Arc::new(store.clone()),
        notifier,
    );
    let orchestrator = ChatOrchestrator::new(
        ChatDependencies {
            store: Arc::new(store.clone()),
            model_client: Arc::new(model_client),
            input_screen: Arc::new(input_screen),
            output_screen: Arc::new(output_screen),
            incidents,
        },
        ChatSettings {
            default_model: config.ollama.default_model.clone(),
            system_prompt,
            max_history_messages: config.system_prompt.max_history_messages,
        },
    );

    let rate_limiter = RateLimiter::new(RateLimitPolicy {
        max_requests: config.chat_rate_limit_max_requests,
        window_seconds: config.chat_rate_limit_window_seconds,
    });
    rate_limiter.spawn_pruner(RATE_LIMIT_PRUNE_INTERVAL);

    let app = http::build_router(http::AppState {
        store,
        orchestrator: Arc::new(orchestrator),
        token_verifier: TokenVerifier::new(&config.auth_jwt_secret),
        rate_limiter,
        trusted_proxy_ips: config.trusted_proxy_ips.iter().copied().collect::<HashSet<_>>(),
    });

    let addr: SocketAddr = config.bind_addr.parse().unwrap_or_else(|_| {
        warn!(bind_addr = %config.bind_addr, "invalid API_BIND_ADDR; using 127.0.0.1:8080");
        SocketAddr::from(([127, 0, 0, 1], 8080))
    });
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .unwrap_or_else(|err| fatal("failed to bind listener", err));

    info!(
        model = %config.ollama.default_model,
        ollama = %config.ollama.base_url,
        "chat api listening on {}",
        listener.local_addr().unwrap_or(addr)
    );
    if let Err(err) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    {
        fatal("server terminated", err);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.trim().eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

fn fatal(context: &str, err: impl Display) -> ! {
    error!("{context}: {err}");
    std::process::exit(1);
}
