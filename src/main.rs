use chrono::Local;
use clap::{Parser, Subcommand};
use log::{error, info};
use std::path::PathBuf;
use std::process::ExitCode;

use wxgrid_service::analysis::resample::{Frequency, Reducer};
use wxgrid_service::config::{Config, DEFAULT_CONFIG_PATH};
use wxgrid_service::db::Store;
use wxgrid_service::error::Error;
use wxgrid_service::ingest::weatherapi::WeatherApiClient;
use wxgrid_service::ingest::{collect_into_store, discover_stations};
use wxgrid_service::logging::{self, DataSource};
use wxgrid_service::lookup::{CurveRequest, PointReport, point_report};
use wxgrid_service::model::Variable;
use wxgrid_service::resolver::GridResolver;
use wxgrid_service::{grid, stations};

const SYS: &str = DataSource::System.target();

#[derive(Debug, Parser)]
#[command(name = "wxgrid", about = "Grid weather logger.")]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, env = "WXGRID_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create the tables if they don't exist
    InitSchema,
    /// Load the grid file and store it as grid points in one batch
    InitGrid {
        /// Overrides `files.grid`
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Ask the weather API for each grid point's backing station and write the station file
    StationCoords {
        /// Overrides `files.station_coords`
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Store one observation per grid point for the current hour
    Collect,
    /// Resolve a coordinate to its grid point and summarize its history
    Nearest {
        #[arg(long, default_value_t = 52.52, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long, default_value_t = 13.40, allow_negative_numbers = true)]
        lon: f64,
        /// Variables to summarize (temp, humidity, clouds, rain, wind, wind_dir, gusts)
        #[arg(long = "variable", default_value = "temp")]
        variables: Vec<Variable>,
        /// Bucket size: weekly or monthly
        #[arg(long, default_value = "weekly")]
        frequency: Frequency,
        /// Bucket reducer: median or mean
        #[arg(long, default_value = "median")]
        reducer: Reducer,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ERROR: {}", logging::error_chain(&e));
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logging::init_logger(
        logging::parse_level(&config.logging.level),
        config.logging.file.as_deref(),
        config.logging.timestamps,
    ) {
        eprintln!("Failed to initialize logger: {}", e);
    }

    match run(cli.cmd, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(target: SYS, "{}", logging::error_chain(&e));
            ExitCode::FAILURE
        }
    }
}

fn run(cmd: Command, config: &Config) -> Result<(), Error> {
    match cmd {
        Command::InitSchema => Store::scoped::<_, Error, _>(config, |store| {
            store.ensure_schema()?;
            info!(target: SYS, "Schema is up to date");
            Ok(())
        }),

        Command::InitGrid { file } => {
            let path = file.unwrap_or_else(|| config.files.grid.clone());
            let points = grid::load_grid(&path)?;
            Store::scoped::<_, Error, _>(config, |store| {
                store.ensure_schema()?;
                store.insert_grid_points(&points)?;
                Ok(())
            })
        }

        Command::StationCoords { out } => {
            let path = out.unwrap_or_else(|| config.files.station_coords.clone());
            let client = WeatherApiClient::new(&config.api)?;
            let points = Store::scoped(config, |store| store.query_grid_points(None))?;
            info!(target: SYS, "Looking up stations for {} grid points, be patient", points.len());
            let (mappings, _) = discover_stations(&client, &points);
            stations::write_station_mappings(&path, &mappings)?;
            Ok(())
        }

        Command::Collect => {
            let client = WeatherApiClient::new(&config.api)?;
            let now = Local::now().naive_local();
            Store::scoped(config, |store| collect_into_store(store, &client, now).map(|_| ()))
        }

        Command::Nearest {
            lat,
            lon,
            variables,
            frequency,
            reducer,
            json,
        } => {
            let mappings = stations::load_station_mappings(&config.files.station_coords)?;
            let requests: Vec<CurveRequest> = variables
                .into_iter()
                .map(|variable| CurveRequest {
                    variable,
                    frequency,
                    reducer,
                })
                .collect();

            let report = Store::scoped(config, |store| {
                let points = store.query_grid_points(None)?;
                let resolver = GridResolver::new(stations::join_stations(&points, &mappings));
                point_report(store, &resolver, lat, lon, &requests, &config.analysis).map_err(Error::from)
            })?;

            if json {
                match serde_json::to_string_pretty(&report) {
                    Ok(text) => println!("{}", text),
                    Err(e) => error!(target: SYS, "Failed to encode report: {}", e),
                }
            } else {
                print_report(&report);
            }
            Ok(())
        }
    }
}

fn print_report(report: &PointReport) {
    println!();
    println!("Input Coordinates:       {:.2}, {:.2}", report.query_lat, report.query_lon);

    let Some(resolution) = report.resolution else {
        println!("No nearest coordinate found.");
        return;
    };

    println!("Nearest Coordinates:     {:.2}, {:.2}", resolution.lat, resolution.lon);
    if let Some(station) = resolution.station {
        println!("Nearest weather station: {:.2}, {:.2}", station.lat_station, station.lon_station);
    }
    println!("Nearest ID: {}", resolution.id);

    match (report.first_observation, report.last_observation) {
        (Some(first), Some(last)) => println!(
            "Observations: {} ({} .. {})",
            report.observation_count, first, last
        ),
        _ => println!("Observations: none"),
    }

    for curve in &report.curves {
        println!();
        println!(
            "{} ({}), {:?} {:?}{}",
            curve.variable,
            curve.variable.unit(),
            curve.frequency,
            curve.reducer,
            curve
                .outlier_quantile
                .map(|q| format!(", values above q{} removed", q))
                .unwrap_or_default()
        );
        for bucket in &curve.buckets {
            match bucket.value {
                Some(v) => println!("  {}  {:>8.2}  (n={})", bucket.end, v, bucket.count),
                None => println!("  {}  {:>8}  (n=0)", bucket.end, "-"),
            }
        }
    }
}
