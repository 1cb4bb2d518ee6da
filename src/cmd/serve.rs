//! HTTP server command: `pushpoll serve`.

use anyhow::Result;
use tracing::info;

use pushpoll::config::Config;

pub async fn cmd_serve(config: Config) -> Result<()> {
    info!(
        model = %config.completion.model,
        poll_mode = %config.poll.mode,
        deadline_secs = config.relay.deadline_secs,
        "starting pushpoll"
    );
    pushpoll::server::start_server(config).await
}
