use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use open_music_engine::{
    audio::{player::PlayerNotice, registry::PlayerRegistry},
    bot::OpenMusicBot,
    config::Config,
    sources::{SourceResolver, YtDlpResolver},
    storage::JsonStorage,
    transport::SongbirdTransport,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("open_music_engine=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Open Music Engine v{}", env!("CARGO_PKG_VERSION"));

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check().await;
    }

    // Cargar configuración
    let config = Config::load()?;
    info!("{}", config.summary());

    // Inicializar almacenamiento JSON
    let storage = Arc::new(
        JsonStorage::new(config.data_dir.clone(), config.default_guild_settings()).await?,
    );

    let songbird = Songbird::serenity();
    let (transport, mut transport_events) =
        SongbirdTransport::new(songbird.clone(), reqwest::Client::new());

    let registry = Arc::new(PlayerRegistry::new(
        storage,
        Arc::new(transport),
        config.default_guild_settings(),
        config.player_options(),
    ));

    // Eventos del transporte hacia los players
    let pump_registry = registry.clone();
    tokio::spawn(async move {
        while let Some(event) = transport_events.recv().await {
            pump_registry.dispatch(event).await;
        }
    });

    tokio::spawn(log_notices(registry.clone()));

    let resolver = Arc::new(SourceResolver::with_defaults(config.resolve_max_entries));

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(OpenMusicBot::new(registry.clone(), resolver))
        .register_songbird_with(songbird)
        .await?;

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    let shutdown_registry = registry.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        shutdown_registry.shutdown().await;
        shard_manager.shutdown_all().await;
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

async fn log_notices(registry: Arc<PlayerRegistry>) {
    let mut notices = registry.subscribe();
    loop {
        match notices.recv().await {
            Ok(PlayerNotice::TrackStarted { guild_id, track, announce }) => {
                info!("▶️ [{}] Ahora suena: {} (anunciar: {})", guild_id, track, announce);
            }
            Ok(PlayerNotice::QueueFinished { guild_id }) => {
                info!("📭 [{}] Cola terminada", guild_id);
            }
            Ok(PlayerNotice::Left { guild_id, reason }) => {
                info!("👋 [{}] Player cerrado: {:?}", guild_id, reason);
            }
            Err(RecvError::Lagged(skipped)) => warn!("Se perdieron {} avisos", skipped),
            Err(RecvError::Closed) => break,
        }
    }
}

async fn health_check() -> Result<()> {
    // Verificar dependencias críticas
    match YtDlpResolver::check_available().await {
        Ok(version) => {
            println!("OK (yt-dlp {version})");
            Ok(())
        }
        Err(e) => anyhow::bail!("Dependencias faltantes: {e}"),
    }
}
