use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "waypoint-server", about = "Waypoint messaging server")]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/waypoint.toml")]
    pub config: String,
}
