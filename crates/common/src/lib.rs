use clap::Parser;
use database::Database;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Config,
}

#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite:fundplan.db")]
    pub database_url: String,

    #[arg(long, env = "PORT", default_value = "3000")]
    pub port: u16,

    /// Minimum number of months covered by a simulation projection.
    #[arg(long, env = "PROJECTION_HORIZON_MONTHS", default_value = "24")]
    pub projection_horizon_months: u32,
}
