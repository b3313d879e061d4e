//! `duckling tools`: list the enabled tools and their inputs.

use duckling_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let registry = duckling_tools::default_registry(&config)?;

    println!("Tools ({} enabled, step budget {})", registry.len(), config.step_budget(registry.len()));
    println!();
    for definition in registry.definitions() {
        println!("  {}", definition.name);
        println!("    {}", definition.description);
        if let Some(properties) = definition.parameters["properties"].as_object() {
            for (field, schema) in properties {
                let kind = schema["type"].as_str().unwrap_or("any");
                println!("    - {field}: {kind}");
            }
        }
        println!();
    }

    Ok(())
}
