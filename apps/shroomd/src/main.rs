mod login;

use std::net::IpAddr;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use shroomio::crypto::CryptoContext;
use shroomio::handshake::Handshake;
use shroomio::handshake::Locale;
use shroomtick::GlobalClock;
use shroomtick::TickScheduler;
use shroomworld::handler::serve_channel_conn;
use shroomworld::handler::GameSession;
use shroomworld::manager::SessionManager;
use shroomworld::store::FileStore;
use shroomworld::store::DEFAULT_MAP;
use shroomworld::timer::RoomTimer;
use shroomworld::topology::RoomServer;
use shroomworld::ChannelId;
use shroomworld::RoomId;
use shroomworld::WorldId;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;
use tracing::Level;

use crate::login::serve_login_conn;
use crate::login::ChannelEndpoint;

const GAME_VERSION: u16 = 95;
const SUB_VERSION: &str = "1";
const LOCALE: Locale = Locale::Global;

fn usage_and_exit() -> ! {
    eprintln!(
        "shroomd (login + channel server)\n\n\
USAGE:\n  shroomd [--bind ADDR] [--login-port PORT] [--channels N]\n\n\
ENV:\n  LISTEN_ADDRESS              default 0.0.0.0\n  LOGIN_PORT                  default 8484\n  CHANNEL_PORT_START          default 8485\n  CHANNELS                    default 2\n  TICK_INTERVAL_MS            default 50\n  CHARACTER_STORE_CONNECTION  default characters.json\n"
    );
    std::process::exit(2);
}

#[derive(Clone, Debug)]
struct Config {
    bind: IpAddr,
    login_port: u16,
    channel_port_start: u16,
    channels: u16,
    tick_interval: Duration,
    store_connection: String,
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(v) => v.parse().unwrap_or_else(|_| usage_and_exit()),
        Err(_) => default,
    }
}

fn parse_args() -> Config {
    let mut bind: IpAddr = env_parsed("LISTEN_ADDRESS", IpAddr::from([0, 0, 0, 0]));
    let mut login_port: u16 = env_parsed("LOGIN_PORT", 8484);
    let channel_port_start: u16 = env_parsed("CHANNEL_PORT_START", 8485);
    let mut channels: u16 = env_parsed("CHANNELS", 2);
    let tick_ms: u64 = env_parsed("TICK_INTERVAL_MS", 50);
    let store_connection = std::env::var("CHARACTER_STORE_CONNECTION")
        .unwrap_or_else(|_| "characters.json".to_string());

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--bind" => {
                let v = it.next().unwrap_or_else(|| usage_and_exit());
                bind = v.parse().unwrap_or_else(|_| usage_and_exit());
            }
            "--login-port" => {
                let v = it.next().unwrap_or_else(|| usage_and_exit());
                login_port = v.parse().unwrap_or_else(|_| usage_and_exit());
            }
            "--channels" => {
                let v = it.next().unwrap_or_else(|| usage_and_exit());
                channels = v.parse().unwrap_or_else(|_| usage_and_exit());
            }
            "-h" | "--help" => usage_and_exit(),
            _ => usage_and_exit(),
        }
    }

    if channels == 0 || tick_ms == 0 {
        usage_and_exit();
    }

    Config {
        bind,
        login_port,
        channel_port_start,
        channels,
        tick_interval: Duration::from_millis(tick_ms),
        store_connection,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,shroomd=info".into()),
        )
        .with_target(false)
        .with_max_level(Level::INFO)
        .init();

    let cfg = parse_args();
    let root = CancellationToken::new();

    let store = Arc::new(FileStore::open(&cfg.store_connection)?);
    let manager = SessionManager::new(store);
    let crypto = CryptoContext::default_keys();

    let clock = GlobalClock::start();
    let scheduler = TickScheduler::new(clock, cfg.tick_interval);
    let scheduler_task = {
        let scheduler = scheduler.clone();
        let cancel = root.clone();
        tokio::spawn(async move { scheduler.run(cancel).await })
    };

    // Topology: one world, one room per channel.
    let rooms = RoomServer::new(scheduler.clone());
    let world = rooms.create_world::<GameSession>(WorldId(0));

    let mut endpoints = Vec::new();
    let mut timers = Vec::new();
    for i in 0..cfg.channels {
        let channel_id = ChannelId(u32::from(i));
        let port = cfg
            .channel_port_start
            .checked_add(i)
            .unwrap_or_else(|| usage_and_exit());
        let channel = rooms.create_channel(&world, channel_id);
        let room = rooms.create_room(&channel, RoomId::new(0, DEFAULT_MAP));
        timers.push(RoomTimer::spawn(
            room.actor.clone(),
            scheduler.notifier(),
            root.child_token(),
        ));

        let listener = TcpListener::bind(SocketAddr::new(cfg.bind, port)).await?;
        info!(channel = %channel_id, port, "channel listening");
        endpoints.push(ChannelEndpoint {
            id: channel_id,
            port,
        });

        let manager = manager.clone();
        let crypto = crypto.clone();
        let room_ref = room.actor.clone();
        let cancel = root.clone();
        tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    _ = cancel.cancelled() => break,
                    a = listener.accept() => a,
                };
                let (stream, peer) = match accepted {
                    Ok(x) => x,
                    Err(e) => {
                        warn!(err = %e, "channel accept failed");
                        continue;
                    }
                };
                let manager = manager.clone();
                let crypto = crypto.clone();
                let room_ref = room_ref.clone();
                let conn_cancel = cancel.child_token();
                tokio::spawn(async move {
                    let hello = Handshake::generate(GAME_VERSION, SUB_VERSION, LOCALE);
                    if let Err(e) = serve_channel_conn(
                        stream,
                        peer,
                        &hello,
                        &crypto,
                        &manager,
                        &room_ref,
                        conn_cancel,
                    )
                    .await
                    {
                        warn!(peer = %peer, err = %e, "channel connection rejected");
                    }
                });
            }
        });
    }

    let login_listener = TcpListener::bind(SocketAddr::new(cfg.bind, cfg.login_port)).await?;
    info!(
        bind = %cfg.bind,
        login_port = cfg.login_port,
        channels = cfg.channels,
        tick_ms = cfg.tick_interval.as_millis() as u64,
        "shroomd listening"
    );

    let endpoints = Arc::new(endpoints);
    {
        let manager = manager.clone();
        let crypto = crypto.clone();
        let endpoints = endpoints.clone();
        let cancel = root.clone();
        tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    _ = cancel.cancelled() => break,
                    a = login_listener.accept() => a,
                };
                let (stream, peer) = match accepted {
                    Ok(x) => x,
                    Err(e) => {
                        warn!(err = %e, "login accept failed");
                        continue;
                    }
                };
                let manager = manager.clone();
                let crypto = crypto.clone();
                let endpoints = endpoints.clone();
                tokio::spawn(async move {
                    let hello = Handshake::generate(GAME_VERSION, SUB_VERSION, LOCALE);
                    if let Err(e) =
                        serve_login_conn(stream, peer, &hello, &crypto, &manager, &endpoints).await
                    {
                        warn!(peer = %peer, err = %e, "login connection ended with error");
                    }
                });
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    root.cancel();

    // The scheduler finishes its current tick before the loop exits.
    let _ = scheduler_task.await;
    info!(active_sessions = manager.active_count(), "shroomd stopped");
    Ok(())
}
