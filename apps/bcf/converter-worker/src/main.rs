//! BCF Converter Worker - Entry Point
//!
//! Consumes conversion jobs from RabbitMQ and reports their status.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    bcf_converter_worker::run().await
}
