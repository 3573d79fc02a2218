//! BCF Status Monitor - Entry Point
//!
//! Logs every status broadcast by the converter workers.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    bcf_converter_worker::run_status_monitor().await
}
