use std::sync::Arc;

use mail_extract::config::ExtractorConfig;
use mail_extract::extractor::MessageExtractor;
use mail_extract::server;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = ExtractorConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: invalid configuration: {e}");
        std::process::exit(1);
    });

    let addr = std::env::var("MAIL_EXTRACT_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string());

    eprintln!("mail-extract v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.tiers[0].model);
    eprintln!(
        "   Tiers: {}",
        config
            .tiers
            .iter()
            .map(|t| t.name.as_str())
            .collect::<Vec<_>>()
            .join(" -> ")
    );
    eprintln!("   Capacity: {} concurrent extractions", config.max_concurrent);
    eprintln!(
        "   Worst-case latency per request: {:?}",
        config.worst_case_latency()
    );
    eprintln!("   Listening on http://{addr}\n");

    let extractor = Arc::new(MessageExtractor::from_config(&config));
    let app = server::routes(extractor);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
