/// TOML configuration loading and validation
mod conf;

pub use conf::Config;
