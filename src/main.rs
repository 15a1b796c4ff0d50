use shopfloor_planner::{SchedulerConfig, server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = SchedulerConfig::load()?;
    server::run_server(config).await
}
