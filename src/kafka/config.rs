use anyhow::Result;
use courier_config::KafkaConfig;
use rdkafka::config::ClientConfig;
use tracing::info;

/// Build the shared `ClientConfig` (brokers, TLS, SASL) for producers,
/// consumers and the admin client.
pub fn create_client_config(config: &KafkaConfig) -> Result<ClientConfig> {
    if config.brokers.trim().is_empty() {
        anyhow::bail!("KAFKA_BROKERS must not be empty");
    }

    let mut client_config = ClientConfig::new();
    client_config.set("bootstrap.servers", &config.brokers);
    client_config.set("security.protocol", "plaintext");

    if config.ssl_enabled {
        info!("Enabling SSL/TLS for Kafka connection");
        client_config.set("security.protocol", "ssl");
        if let Some(ca_location) = &config.ssl_ca_location {
            client_config.set("ssl.ca.location", ca_location);
        }
    }

    if let (Some(mechanism), Some(username), Some(password)) = (
        &config.sasl_mechanism,
        &config.sasl_username,
        &config.sasl_password,
    ) {
        info!(sasl_mechanism = %mechanism, "Configuring SASL authentication");
        client_config
            .set("sasl.mechanism", mechanism)
            .set("sasl.username", username)
            .set("sasl.password", password);

        if config.ssl_enabled {
            client_config.set("security.protocol", "sasl_ssl");
        } else {
            client_config.set("security.protocol", "sasl_plaintext");
        }
    }

    Ok(client_config)
}
