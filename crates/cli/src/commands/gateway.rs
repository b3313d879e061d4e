//! `duckling gateway`: start the HTTP/SSE server.

use duckling_config::AppConfig;

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }
    if !config.has_api_key() {
        eprintln!("  Warning: no API key configured, chat requests will fail with 502.");
    }

    println!("Duckling Gateway");
    println!("   Listening: http://{}:{}", config.gateway.host, config.gateway.port);
    println!("   Provider:  {} ({})", config.provider, config.model);
    println!("   Tools:     {}", config.tools.enabled.join(", "));

    duckling_gateway::start(config).await?;

    Ok(())
}
