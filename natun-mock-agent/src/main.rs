use std::time::Duration;

use clap::Parser;
use natun_core::ConnectionMode;
use natun_mock_agent::{AgentSettings, AppState, serve};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "natun-mock-agent")]
struct AgentArgs {
    #[arg(long, default_value = "127.0.0.1:8898")]
    bind_address: String,
    #[arg(long, default_value = "NT4K2QX9")]
    client_id: String,
    #[arg(long, default_value = "123456")]
    password: String,
    /// Password simulated peers accept. Any password is accepted when omitted.
    #[arg(long)]
    peer_password: Option<String>,
    #[arg(long, default_value_t = 1500)]
    connect_delay_ms: u64,
    /// Settle connections on the relay link instead of a direct one.
    #[arg(long, default_value_t = false)]
    relay: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = AgentArgs::parse();
    let settings = AgentSettings {
        client_id: args.client_id,
        password: args.password,
        peer_password: args.peer_password,
        link: if args.relay {
            ConnectionMode::Relay
        } else {
            ConnectionMode::Direct
        },
        connect_delay: Duration::from_millis(args.connect_delay_ms),
        ..AgentSettings::default()
    };

    let listener = match tokio::net::TcpListener::bind(&args.bind_address).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("failed to bind {}: {}", args.bind_address, err);
            std::process::exit(1);
        }
    };

    info!(client_id = %settings.client_id, "mock agent starting on {}", args.bind_address);
    if let Err(err) = serve(listener, AppState::new(settings)).await {
        warn!("mock agent exited: {}", err);
    }
}
