use metal_price_sync::{
    constants::REFRESH_SPINNER_MS, HealthStatus, Metal, PriceBoard, SyncEvent, SyncStatus,
};
use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("metal_price_sync=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    println!("Live Precious Metals");
    println!("====================");

    let board = PriceBoard::metals().await?;

    for round in 0..6 {
        sleep(Duration::from_secs(2)).await;

        println!("\n{:-<50}", "");
        for (metal, state) in board.states().await {
            match &state.status {
                SyncStatus::Ready(snapshot) => println!(
                    "{:<10} {:<4} ${:<10.2} {} {:.2}%",
                    metal.name().to_uppercase(),
                    snapshot.symbol,
                    snapshot.current,
                    if snapshot.is_up() { "▲" } else { "▼" },
                    snapshot.change_percent
                ),
                SyncStatus::Loading => println!("{:<10} loading...", metal.name().to_uppercase()),
                SyncStatus::Failed(error) => {
                    println!("{:<10} {} (retrying)", metal.name().to_uppercase(), error);
                    board.retry(&metal).await?;
                }
            }
        }

        if round == 2 {
            println!("\nPull to refresh...");
            let generation = board.refresh_all();
            sleep(Duration::from_millis(REFRESH_SPINNER_MS)).await;
            println!("Refresh generation {}", generation);
        }
    }

    // Detail view for gold once its tile is selectable
    match board.open_detail(&Metal::Gold).await {
        Ok(detail) => {
            let mut events = detail.events();
            while let Ok(event) = events.recv().await {
                println!("{}", event);
                if !matches!(event, SyncEvent::FetchStarted { .. }) {
                    break;
                }
            }
            if let SyncStatus::Ready(snapshot) = detail.state().status {
                if let Some(details) = snapshot.details {
                    println!(
                        "GOLD open ${:.2}  prev close ${:.2}  high ${:.2}  low ${:.2}  {}",
                        snapshot.open,
                        snapshot.previous_close,
                        details.day_high,
                        details.day_low,
                        details.exchange
                    );
                }
            }
        }
        Err(e) => eprintln!("Cannot open gold details: {}", e),
    }

    let health = board.health_check().await;
    if health.status != HealthStatus::Healthy {
        eprintln!("Board health: {:?}", health.message);
    }

    board.shutdown().await;
    Ok(())
}
