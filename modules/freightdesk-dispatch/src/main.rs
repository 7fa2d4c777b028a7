use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use freightdesk_client::FreightDeskClient;
use freightdesk_common::{Config, FreightQuery, SearchFilter, VehicleLocationState};
use freightdesk_dispatch::{ScrapeOrchestrator, Stage, StatusSummary};

#[derive(Parser)]
#[command(name = "freightdesk", about = "Freight scrape dispatch for the dispatcher dashboard")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scrape with manual filters (origin or destination required)
    Scrape(FilterArgs),
    /// Scrape using a truck's location as the origin
    Gps {
        #[arg(long)]
        truck: Option<i64>,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Resolve a truck's location without scraping
    Prefill {
        #[arg(long)]
        truck: i64,
    },
    /// Open the automation browser session
    Launch,
    /// List freight offers, optionally narrowed to a route
    Freights {
        #[arg(long)]
        origin: Option<String>,
        #[arg(long)]
        destination: Option<String>,
    },
}

#[derive(Args)]
struct FilterArgs {
    #[arg(long)]
    origin: Option<String>,
    #[arg(long)]
    destination: Option<String>,
    /// YYYY-MM-DD
    #[arg(long)]
    loading_from: Option<String>,
    #[arg(long)]
    loading_to: Option<String>,
    #[arg(long)]
    unloading_from: Option<String>,
    #[arg(long)]
    unloading_to: Option<String>,
}

impl From<FilterArgs> for SearchFilter {
    fn from(args: FilterArgs) -> Self {
        SearchFilter {
            origin: args.origin,
            destination: args.destination,
            loading_date_from: args.loading_from,
            loading_date_to: args.loading_to,
            unloading_date_from: args.unloading_from,
            unloading_date_to: args.unloading_to,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("freightdesk=info".parse()?))
        .init();

    let cli = Cli::parse();

    let config = Config::from_env()?;
    config.log_summary();

    let client = Arc::new(FreightDeskClient::new(&config.api_base_url, config.http_timeout)?);
    let orchestrator = Arc::new(ScrapeOrchestrator::with_client(client.clone(), &config));

    let interrupt = orchestrator.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, closing session");
            interrupt.close();
        }
    });

    match cli.command {
        Command::Scrape(filter) => {
            orchestrator.refresh_freights().await?;
            orchestrator.trigger_manual_scrape(filter.into()).await?;
            report(orchestrator.wait_until_settled().await)
        }
        Command::Gps { truck, filter } => {
            let vehicle = match truck {
                Some(id) => Some(load_vehicle(&client, id).await?),
                None => None,
            };
            orchestrator.refresh_freights().await?;
            orchestrator.trigger_gps_scrape(filter.into(), vehicle).await?;
            report(orchestrator.wait_until_settled().await)
        }
        Command::Prefill { truck } => {
            let vehicle = load_vehicle(&client, truck).await?;
            match orchestrator.prefill_origin(vehicle).await? {
                Some(origin) => println!("{origin}"),
                None => println!("(no location known for truck {truck})"),
            }
            Ok(())
        }
        Command::Launch => {
            let ack = orchestrator.launch_automation_session().await?;
            println!("{}", ack.message.as_deref().unwrap_or("Browser launched"));
            Ok(())
        }
        Command::Freights {
            origin,
            destination,
        } => {
            let query = FreightQuery::first_page(config.freight_page_size)
                .with_route(origin.as_deref(), destination.as_deref());
            for freight in client.list_freights(&query).await? {
                println!(
                    "{:>6}  {:<32} -> {:<32} {:>10}  {}",
                    freight.id,
                    freight.loading_place.as_deref().unwrap_or("?"),
                    freight.unloading_place.as_deref().unwrap_or("?"),
                    freight.loading_date.as_deref().unwrap_or("-"),
                    freight
                        .price_original
                        .map(|p| format!("{p:.0} {}", freight.currency.as_deref().unwrap_or("")))
                        .unwrap_or_default(),
                );
            }
            orchestrator.refresh_freights().await?;
            println!("{}", orchestrator.status());
            Ok(())
        }
    }
}

async fn load_vehicle(client: &FreightDeskClient, truck_id: i64) -> Result<VehicleLocationState> {
    let truck = client.get_truck(truck_id).await?;
    info!(
        truck_id,
        plate = truck.license_plate.as_deref().unwrap_or("-"),
        "Loaded truck"
    );
    Ok(truck.into())
}

fn report(summary: StatusSummary) -> Result<()> {
    println!("{summary}");
    match summary.stage {
        Stage::Error => bail!(summary.last_error.unwrap_or_else(|| "Scrape failed".to_string())),
        _ => Ok(()),
    }
}
