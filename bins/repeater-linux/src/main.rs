mod file_flash;
mod settings;

use std::net::SocketAddr;

use repeater_core::platform::IpInfo;
use repeater_core::signal::RadioEvent;
use repeater_core::sim::SimPlatform;
use repeater_core::{Capabilities, ConfigStore, PowerRequest, Repeater, Signal};
use repeater_server::{ConsoleServer, EventLoop};
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use file_flash::FileFlash;
use settings::HostSettings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,repeater=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = HostSettings::load()?;
    let mut flash = FileFlash::open(&settings.flash_image);

    if std::env::args().any(|arg| arg == "--dump-config") {
        let (config, valid) = ConfigStore::new(flash).load();
        if !valid {
            tracing::warn!("No valid record in flash, showing defaults");
        }
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    tracing::info!("Repeater starting...");

    loop {
        let mut platform = SimPlatform::new();
        platform.vdd = settings.supply_mv;
        let repeater = Repeater::boot(platform, flash, Capabilities::all());

        let mut event_loop = EventLoop::new(repeater);
        let serial_replies = event_loop.serial_output();
        let engine = event_loop.handle();
        let config = event_loop.repeater().config().clone();

        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        if config.config_port != 0 {
            let addr = SocketAddr::new(settings.bind_addr, config.config_port);
            let console = ConsoleServer::new(addr, engine.clone());
            tasks.push(tokio::spawn(async move {
                if let Err(e) = console.run().await {
                    tracing::error!("Console server error: {}", e);
                }
            }));
        }

        if config.web_port != 0 {
            let addr = SocketAddr::new(settings.bind_addr, config.web_port);
            let web_engine = engine.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = repeater_web::serve(addr, web_engine).await {
                    tracing::error!("Web server error: {}", e);
                }
            }));
        }

        if settings.serial_console {
            let serial_engine = engine.clone();
            tasks.push(tokio::spawn(async move {
                let stdin = tokio::io::stdin();
                let stdout = tokio::io::stdout();
                if let Err(e) =
                    repeater_server::run_serial(serial_engine, stdin, stdout, serial_replies).await
                {
                    tracing::error!("Serial console error: {}", e);
                }
            }));
        }

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let gpio_engine = engine.clone();
            let mut usr1 = signal(SignalKind::user_defined1())?;
            tasks.push(tokio::spawn(async move {
                while usr1.recv().await.is_some() {
                    tracing::debug!("SIGUSR1: GPIO input edge");
                    gpio_engine.gpio_edge();
                }
            }));
        }

        if let (Some(uplink), true) = (&settings.uplink, config.auto_connect) {
            let got_ip = event_loop.repeater_mut().platform.station_got_ip(IpInfo {
                ip: uplink.ip,
                netmask: uplink.netmask,
                gw: uplink.gateway,
            });
            engine.post(Signal::Radio(RadioEvent::StationConnected {
                ssid: config.ssid,
                bssid: config.bssid,
                channel: uplink.channel,
            }));
            engine.post(Signal::Radio(got_ip));
        }

        let halted = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C, shutting down...");
                for task in &tasks {
                    task.abort();
                }
                return Ok(());
            }
            halted = event_loop.run() => halted,
        };

        for task in &tasks {
            task.abort();
        }

        match halted.request {
            PowerRequest::Restart => tracing::info!("Restarting"),
            PowerRequest::DeepSleep(duration) => {
                tracing::info!("Deep sleep for {:?}", duration);
                tokio::time::sleep(duration).await;
            }
        }
        flash = halted.repeater.store.into_inner();
    }
}
