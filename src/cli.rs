use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "meter-monitor", version, about = "Multi-meter vision-reading monitor")]
pub struct Args {
    /// Path to the meters.yaml definition file.
    #[arg(long, default_value = "./config/meters.yaml")]
    pub meters_config: PathBuf,
    /// Path to the pricing.yaml passthrough file.
    #[arg(long, default_value = "./config/pricing.yaml")]
    pub pricing_config: PathBuf,
    /// Print the OpenAPI document to stdout and exit, without starting the server.
    #[arg(long, default_value_t = false)]
    pub print_openapi: bool,
}
