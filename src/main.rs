/// Entry point of the CNI plugin manager.
///
/// Reads the configuration from the environment and runs the agent until interrupted.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the agent fails to start.
///
/// # Examples
///
/// ```bash
/// RUST_LOG=debug CNI_PATH=/opt/cni/bin cargo run
/// ```
#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let config = cni_plugin_manager::config::Config::from_env()?;
    cni_plugin_manager::run(config).await
}
